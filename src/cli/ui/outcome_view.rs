use std::fmt::{self, Display, Formatter};
use std::path::Path;

use serde_json::{Value, json};

use crate::classify::AdoptionClassification;
use crate::payload::{DeviceInfoPayload, PartialPayload, ProtocolOutcome};
use crate::utils::truncate_preview;

use super::painter::Painter;
use super::table::Table;

const PARTIAL_PREVIEW_CHARS: usize = 120;

/// Renders a device-info payload as a field table followed by its scale rows.
struct PayloadView<'a> {
    payload: &'a DeviceInfoPayload,
    painter: &'a Painter,
}

impl Display for PayloadView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let payload = self.payload;
        let value = |text: &str| {
            if text.is_empty() {
                self.painter.muted("<none>")
            } else {
                self.painter.value(text)
            }
        };
        let status = if payload.adoption_status_description().is_empty() {
            payload.adoption_status_code().to_string()
        } else {
            format!(
                "{} ({})",
                payload.adoption_status_code(),
                payload.adoption_status_description()
            )
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("device_name", value(payload.device_name())),
                ("device_id", value(payload.device_id())),
                ("board_type", value(payload.board_type())),
                ("mac_address", value(payload.mac_address())),
                ("device_type", value(payload.device_type())),
                ("sensor_type", value(payload.sensor_type())),
                ("actuator_type", value(payload.actuator_type())),
                ("adoption_status", self.painter.value(status)),
                ("broker_url", value(payload.broker_url())),
                ("topic", value(payload.topic())),
                ("user_id", value(payload.owning_user_id())),
            ],
        );
        write!(f, "{table}")?;

        if !payload.scale_rows().is_empty() {
            let rows = payload
                .scale_rows()
                .iter()
                .map(|row| vec![row.metric().to_string(), row.unit().to_string()])
                .collect();
            write!(f, "\n{}", Table::grid(["metric", "unit"], rows))?;
        }
        Ok(())
    }
}

struct PartialView<'a> {
    partial: &'a PartialPayload,
    painter: &'a Painter,
}

impl Display for PartialView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {}",
            self.painter.warning("Partial reply:"),
            self.painter.value(format!(
                "{} bytes received before the device went quiet",
                self.partial.received_chars()
            ))
        )?;
        write!(
            f,
            "{}",
            self.painter.muted(truncate_preview(
                self.partial.raw_text(),
                PARTIAL_PREVIEW_CHARS
            ))
        )
    }
}

/// Renders the terminal result of a `probe` exchange.
pub(crate) struct OutcomeView<'a> {
    outcome: &'a ProtocolOutcome,
    painter: &'a Painter,
}

impl<'a> OutcomeView<'a> {
    pub(crate) fn new(outcome: &'a ProtocolOutcome, painter: &'a Painter) -> Self {
        Self { outcome, painter }
    }
}

impl Display for OutcomeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let painter = self.painter;
        match self.outcome {
            ProtocolOutcome::Success(payload) => {
                writeln!(f, "{}", painter.heading("Device info"))?;
                write!(f, "{}", PayloadView { payload, painter })
            }
            ProtocolOutcome::Partial(partial) => write!(f, "{}", PartialView { partial, painter }),
            ProtocolOutcome::Failure(reason) => write!(
                f,
                "{} {}",
                painter.error("Exchange failed:"),
                painter.value(reason.to_string())
            ),
        }
    }
}

/// Renders an adoption classification.
pub(crate) struct ClassificationView<'a> {
    classification: &'a AdoptionClassification,
    painter: &'a Painter,
}

impl<'a> ClassificationView<'a> {
    pub(crate) fn new(classification: &'a AdoptionClassification, painter: &'a Painter) -> Self {
        Self {
            classification,
            painter,
        }
    }
}

impl Display for ClassificationView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let painter = self.painter;
        match self.classification {
            AdoptionClassification::Unauthorized => write!(
                f,
                "{} {}",
                painter.warning("Unauthorized:"),
                painter.value("the device belongs to another user")
            ),
            AdoptionClassification::AdoptAvailable(payload) => {
                writeln!(
                    f,
                    "{} {}",
                    painter.success("Available:"),
                    painter.value("the device can be adopted")
                )?;
                write!(f, "{}", PayloadView { payload, painter })
            }
            AdoptionClassification::Owner(payload) => {
                writeln!(
                    f,
                    "{} {}",
                    painter.success("Owner:"),
                    painter.value("the device is already yours")
                )?;
                write!(f, "{}", PayloadView { payload, painter })
            }
            AdoptionClassification::Error(message) => write!(
                f,
                "{} {}",
                painter.error("Classification failed:"),
                painter.value(message)
            ),
        }
    }
}

/// Renders the stored caller identity.
pub(crate) struct IdentityView<'a> {
    user_id: Option<&'a str>,
    path: &'a Path,
    painter: &'a Painter,
}

impl<'a> IdentityView<'a> {
    pub(crate) fn new(user_id: Option<&'a str>, path: &'a Path, painter: &'a Painter) -> Self {
        Self {
            user_id,
            path,
            painter,
        }
    }
}

impl Display for IdentityView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let user_id = match self.user_id {
            Some(user_id) => self.painter.value(user_id),
            None => self.painter.muted("<anonymous>"),
        };
        let table = Table::key_value(
            self.painter,
            vec![
                ("user_id", user_id),
                ("path", self.painter.value(self.path.display().to_string())),
            ],
        );
        write!(f, "{table}")
    }
}

/// Line printed when the user interrupts an exchange.
pub(crate) struct CancelledView<'a> {
    painter: &'a Painter,
}

impl<'a> CancelledView<'a> {
    pub(crate) fn new(painter: &'a Painter) -> Self {
        Self { painter }
    }

    /// JSON document emitted for a cancelled exchange.
    pub(crate) fn json() -> Value {
        json!({ "kind": "cancelled" })
    }
}

impl Display for CancelledView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.warning("Exchange cancelled"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::payload::{FailureReason, ScaleRow};

    fn payload() -> DeviceInfoPayload {
        DeviceInfoPayload::builder()
            .device_name("Kitchen")
            .device_id("D1")
            .adoption_status_code(1)
            .adoption_status_description("adopted")
            .owning_user_id("U1")
            .scale(vec![ScaleRow::new("temperature", "C")])
            .build()
    }

    #[test]
    fn success_lists_fields_and_scale() {
        let painter = Painter::new(false);
        let outcome = ProtocolOutcome::Success(payload());
        let rendered = OutcomeView::new(&outcome, &painter).to_string();

        assert!(rendered.starts_with("Device info\n"));
        assert!(rendered.contains("Kitchen"));
        assert!(rendered.contains("1 (adopted)"));
        assert!(rendered.contains("<none>"));
        assert!(rendered.contains("│ temperature │ C    │"));
    }

    #[test]
    fn partial_reports_byte_count_and_truncated_preview() {
        let painter = Painter::new(false);
        let text = format!("{{\"device_name\":\"{}", "x".repeat(200));
        let received = text.len();
        let outcome = ProtocolOutcome::Partial(PartialPayload::new(text, received));
        let rendered = OutcomeView::new(&outcome, &painter).to_string();

        assert!(rendered.contains(&format!("{received} bytes received")));
        assert!(rendered.ends_with('…'));
    }

    #[rstest]
    #[case::unauthorized(AdoptionClassification::Unauthorized, "Unauthorized: the device belongs to another user")]
    #[case::error(
        AdoptionClassification::Error("timeout".into()),
        "Classification failed: timeout"
    )]
    fn classification_without_payload_is_one_line(
        #[case] classification: AdoptionClassification,
        #[case] expected: &str,
    ) {
        let painter = Painter::new(false);
        assert_eq!(
            expected,
            ClassificationView::new(&classification, &painter).to_string()
        );
    }

    #[test]
    fn owner_classification_includes_payload() {
        let painter = Painter::new(false);
        let classification = AdoptionClassification::Owner(payload());
        let rendered = ClassificationView::new(&classification, &painter).to_string();

        assert!(rendered.starts_with("Owner: the device is already yours\n"));
        assert!(rendered.contains("D1"));
    }

    #[test]
    fn failure_and_cancel_render_one_line() {
        let painter = Painter::new(false);
        let outcome = ProtocolOutcome::Failure(FailureReason::WriteFailed);

        assert_eq!(
            "Exchange failed: write failed",
            OutcomeView::new(&outcome, &painter).to_string()
        );
        assert_eq!(
            "Exchange cancelled",
            CancelledView::new(&painter).to_string()
        );
        assert_eq!(json!({"kind": "cancelled"}), CancelledView::json());
    }

    #[test]
    fn identity_view_marks_anonymous_caller() {
        let painter = Painter::new(false);
        let rendered =
            IdentityView::new(None, Path::new("/tmp/devinfo/user-id"), &painter).to_string();

        assert!(rendered.contains("<anonymous>"));
        assert!(rendered.contains("/tmp/devinfo/user-id"));
    }
}
