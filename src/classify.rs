use serde::Serialize;

use crate::payload::DeviceInfoPayload;

/// Adoption state of a device relative to the caller.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AdoptionClassification {
    /// The device belongs to another user.
    Unauthorized,
    AdoptAvailable(DeviceInfoPayload),
    Owner(DeviceInfoPayload),
    Error(String),
}

impl AdoptionClassification {
    /// Short label used in logs and terminal output.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::AdoptAvailable(_) => "adopt_available",
            Self::Owner(_) => "owner",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn payload(&self) -> Option<&DeviceInfoPayload> {
        match self {
            Self::AdoptAvailable(payload) | Self::Owner(payload) => Some(payload),
            Self::Unauthorized | Self::Error(_) => None,
        }
    }
}

/// Maps a decoded payload and the caller's identity to an adoption state.
pub struct Classifier;

impl Classifier {
    /// Classifies `payload` for the caller identified by `caller_user_id`.
    ///
    /// Rules apply in order and the first match wins:
    ///
    /// 1. a non-empty owner other than the caller yields `Unauthorized`;
    /// 2. status code `0` yields `AdoptAvailable`;
    /// 3. an owner equal to the caller yields `Owner`;
    /// 4. anything else is reported as `Error`.
    ///
    /// ```
    /// use devinfo::{AdoptionClassification, Classifier, DeviceInfoPayload};
    ///
    /// let payload = DeviceInfoPayload::builder()
    ///     .owning_user_id("U1")
    ///     .adoption_status_code(1)
    ///     .build();
    /// assert_eq!(
    ///     AdoptionClassification::Unauthorized,
    ///     Classifier::classify(payload, Some("U2")),
    /// );
    /// ```
    #[must_use]
    pub fn classify(
        payload: DeviceInfoPayload,
        caller_user_id: Option<&str>,
    ) -> AdoptionClassification {
        let owner = payload.owning_user_id();
        if !owner.is_empty() && caller_user_id != Some(owner) {
            return AdoptionClassification::Unauthorized;
        }
        if payload.adoption_status_code() == 0 {
            return AdoptionClassification::AdoptAvailable(payload);
        }
        if caller_user_id == Some(owner) {
            return AdoptionClassification::Owner(payload);
        }
        AdoptionClassification::Error("unexpected state".to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn payload(owner: &str, status: i64) -> DeviceInfoPayload {
        DeviceInfoPayload::builder()
            .owning_user_id(owner)
            .adoption_status_code(status)
            .device_name("Greenhouse")
            .build()
    }

    #[rstest]
    #[case::foreign_owner_with_status(payload("U1", 1), Some("U2"), "unauthorized")]
    #[case::foreign_owner_wins_over_unadopted_status(payload("U1", 0), Some("U2"), "unauthorized")]
    #[case::owned_device_and_anonymous_caller(payload("U1", 1), None, "unauthorized")]
    #[case::unadopted(payload("", 0), Some("U2"), "adopt_available")]
    #[case::unadopted_anonymous(payload("", 0), None, "adopt_available")]
    #[case::own_device(payload("U2", 1), Some("U2"), "owner")]
    #[case::own_unadopted_device(payload("U2", 0), Some("U2"), "adopt_available")]
    #[case::adopted_without_owner(payload("", 1), Some("U2"), "error")]
    #[case::adopted_without_owner_anonymous(payload("", 2), None, "error")]
    fn classification_follows_rule_priority(
        #[case] payload: DeviceInfoPayload,
        #[case] caller: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, Classifier::classify(payload, caller).label());
    }

    #[rstest]
    fn foreign_owner_is_unauthorized_for_any_status(#[values(-1, 0, 1, 2, 99)] status: i64) {
        assert_eq!(
            AdoptionClassification::Unauthorized,
            Classifier::classify(payload("U1", status), Some("U2"))
        );
    }

    #[test]
    fn available_and_owner_carry_the_payload() {
        let available = Classifier::classify(payload("", 0), Some("U2"));
        assert_matches!(&available, AdoptionClassification::AdoptAvailable(p) if p.device_name() == "Greenhouse");

        let owner = Classifier::classify(payload("U2", 1), Some("U2"));
        assert_eq!(Some(&payload("U2", 1)), owner.payload());
    }

    #[test]
    fn inconsistent_state_is_surfaced() {
        assert_eq!(
            AdoptionClassification::Error("unexpected state".to_string()),
            Classifier::classify(payload("", 1), Some("U2"))
        );
    }

    #[test]
    fn classification_serialises_with_kind_tag() {
        let json = serde_json::to_value(AdoptionClassification::Unauthorized)
            .expect("classification should serialise");
        assert_eq!(serde_json::json!({"kind": "unauthorized"}), json);
    }
}
