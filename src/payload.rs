use bon::Builder;
use serde::{Deserialize, Deserializer, Serialize};
use serde_with::{DefaultOnNull, DeserializeAs, DisplayFromStr, PickFirst, SerializeDisplay, serde_as};

/// One scale row reported by the device: a metric name and its unit.
///
/// `null` cells decode as the empty string.
#[serde_as]
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ScaleRow(
    #[serde_as(as = "DefaultOnNull")] pub String,
    #[serde_as(as = "DefaultOnNull")] pub String,
);

impl ScaleRow {
    /// Creates a scale row.
    #[must_use]
    pub fn new(metric: impl Into<String>, unit: impl Into<String>) -> Self {
        Self(metric.into(), unit.into())
    }

    /// Metric name.
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.0
    }

    /// Unit of the metric.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.1
    }
}

/// Decoded device-info document returned by a peripheral.
///
/// Every string field is total: absent or `null` values decode as the empty
/// string. Unknown fields are ignored.
#[serde_as]
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct DeviceInfoPayload {
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    board_type: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    mac_address: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    device_type: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    sensor_type: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    actuator_type: String,
    #[serde_as(as = "DefaultOnNull<PickFirst<(_, DisplayFromStr, IntegralFloat)>>")]
    #[builder(name = adoption_status_code, default)]
    adoption_status: i64,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    adoption_status_description: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    broker_url: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    topic: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(default)]
    scale: Vec<ScaleRow>,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(name = owning_user_id, into, default)]
    user_id: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    device_id: String,
    #[serde_as(as = "DefaultOnNull")]
    #[builder(into, default)]
    device_name: String,
}

impl DeviceInfoPayload {
    /// Board family reported by the firmware.
    #[must_use]
    pub fn board_type(&self) -> &str {
        &self.board_type
    }

    #[must_use]
    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    #[must_use]
    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    #[must_use]
    pub fn sensor_type(&self) -> &str {
        &self.sensor_type
    }

    #[must_use]
    pub fn actuator_type(&self) -> &str {
        &self.actuator_type
    }

    /// Adoption status code; `0` means the device has not been adopted.
    #[must_use]
    pub fn adoption_status_code(&self) -> i64 {
        self.adoption_status
    }

    #[must_use]
    pub fn adoption_status_description(&self) -> &str {
        &self.adoption_status_description
    }

    /// Message-broker URL the device publishes to.
    #[must_use]
    pub fn broker_url(&self) -> &str {
        &self.broker_url
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Metric/unit rows in device order.
    #[must_use]
    pub fn scale_rows(&self) -> &[ScaleRow] {
        &self.scale
    }

    /// Identifier of the owning user, empty when unowned.
    #[must_use]
    pub fn owning_user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

/// Accepts a JSON float with no fractional part where an integer is expected.
struct IntegralFloat;

impl<'de> DeserializeAs<'de, i64> for IntegralFloat {
    fn deserialize_as<D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        if value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64 {
            Ok(value as i64)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected an integral number, found {value}"
            )))
        }
    }
}

/// Degraded result produced when the peer went quiet mid-document.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PartialPayload {
    raw_text: String,
    received_chars: usize,
}

impl PartialPayload {
    pub(crate) fn new(raw_text: String, received_chars: usize) -> Self {
        Self {
            raw_text,
            received_chars,
        }
    }

    /// Accumulated reply text, lossily decoded as UTF-8.
    #[must_use]
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// Always `true`; a partial payload never represents a complete reply.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        true
    }

    /// Number of buffered reply bytes.
    #[must_use]
    pub fn received_chars(&self) -> usize {
        self.received_chars
    }
}

/// Why an exchange failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, derive_more::Display, SerializeDisplay)]
pub enum FailureReason {
    #[display("connection failed")]
    ConnectionFailed,
    #[display("service discovery failed")]
    ServiceDiscoveryFailed,
    #[display("characteristic not found")]
    CharacteristicNotFound,
    #[display("write failed")]
    WriteFailed,
    #[display("device disconnected")]
    DeviceDisconnected,
    /// The reply was complete JSON but not a device-info document.
    #[display("invalid payload")]
    InvalidPayload,
    #[display("no data received")]
    NoDataReceived,
    #[display("timeout")]
    Timeout,
    /// The session task ended without reporting an outcome.
    #[display("session aborted")]
    SessionAborted,
}

/// Terminal result of one device-info exchange.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProtocolOutcome {
    Success(DeviceInfoPayload),
    Partial(PartialPayload),
    Failure(FailureReason),
}

impl ProtocolOutcome {
    /// Short label used in logs and terminal output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Partial(_) => "partial",
            Self::Failure(_) => "failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn decodes_full_document() {
        let payload: DeviceInfoPayload = serde_json::from_str(
            r#"{
                "board_type": "esp32",
                "mac_address": "AA:BB:CC:DD:EE:FF",
                "device_type": "sensor",
                "sensor_type": "dht22",
                "actuator_type": "",
                "adoption_status": 1,
                "adoption_status_description": "adopted",
                "broker_url": "mqtt://broker.local:1883",
                "topic": "home/kitchen",
                "scale": [["temperature", "C"], ["humidity", "%"]],
                "user_id": "U1",
                "device_id": "D1",
                "device_name": "Kitchen"
            }"#,
        )
        .expect("full document should decode");

        assert_eq!("esp32", payload.board_type());
        assert_eq!(1, payload.adoption_status_code());
        assert_eq!(
            &[ScaleRow::new("temperature", "C"), ScaleRow::new("humidity", "%")],
            payload.scale_rows()
        );
        assert_eq!("U1", payload.owning_user_id());
    }

    #[test]
    fn missing_and_null_fields_default_to_empty() {
        let payload: DeviceInfoPayload =
            serde_json::from_str(r#"{"device_name": null, "extra": [1, 2, 3]}"#)
                .expect("sparse document should decode");

        assert_eq!(DeviceInfoPayload::default(), payload);
        assert_eq!("", payload.device_name());
        assert_eq!(0, payload.adoption_status_code());
    }

    #[rstest]
    #[case::integer(r#"{"adoption_status": 2}"#, 2)]
    #[case::numeric_string(r#"{"adoption_status": "0"}"#, 0)]
    #[case::integral_float(r#"{"adoption_status": 1.0}"#, 1)]
    #[case::null(r#"{"adoption_status": null}"#, 0)]
    fn adoption_status_accepts_numeric_spellings(#[case] document: &str, #[case] expected: i64) {
        let payload: DeviceInfoPayload =
            serde_json::from_str(document).expect("numeric status should decode");
        assert_eq!(expected, payload.adoption_status_code());
    }

    #[test]
    fn null_scale_cells_default_to_empty() {
        let payload: DeviceInfoPayload =
            serde_json::from_str(r#"{"scale": [["t", null], [null, "C"]]}"#)
                .expect("null scale cells should decode");
        assert_eq!(
            &[ScaleRow::new("t", ""), ScaleRow::new("", "C")],
            payload.scale_rows()
        );
    }

    #[rstest]
    #[case::word(r#"{"adoption_status": "one"}"#)]
    #[case::fractional(r#"{"adoption_status": 1.5}"#)]
    #[case::object_as_name(r#"{"device_name": {"first": "a"}}"#)]
    fn mistyped_field_is_rejected(#[case] document: &str) {
        let result = serde_json::from_str::<DeviceInfoPayload>(document);
        assert_matches!(result, Err(_));
    }

    #[test]
    fn builder_setters_match_getters() {
        let payload = DeviceInfoPayload::builder()
            .owning_user_id("U1")
            .adoption_status_code(1)
            .build();
        assert_eq!("U1", payload.owning_user_id());
        assert_eq!(1, payload.adoption_status_code());
    }

    #[test]
    fn failure_reason_renders_as_message() {
        assert_snapshot!(FailureReason::CharacteristicNotFound.to_string(), @"characteristic not found");
    }

    #[test]
    fn outcome_serialises_with_kind_tag() {
        let json = serde_json::to_value(ProtocolOutcome::Failure(FailureReason::Timeout))
            .expect("outcome should serialise");
        assert_eq!(
            serde_json::json!({"kind": "failure", "value": "timeout"}),
            json
        );
    }
}
