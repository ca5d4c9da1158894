use serde::{Deserialize, Serialize};

/// Lifecycle of one device under a [`DeviceController`](super::DeviceController).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeviceStatus {
    #[default]
    Disengaged,
    Engaging,
    Engaged,
    Disengaging,
}

impl DeviceStatus {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: DeviceStatus) -> bool {
        use DeviceStatus::*;

        matches!(
            (self, target),
            (Disengaged, Engaging)
                // connect failed, or no device info arrived
                | (Engaging, Disengaging)
                | (Engaging, Disengaged)
                | (Engaging, Engaged)
                | (Engaged, Disengaging)
                | (Disengaging, Disengaged)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Disengaged => "Disengaged",
            Self::Engaging => "Engaging",
            Self::Engaged => "Engaged",
            Self::Disengaging => "Disengaging",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disengaged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(DeviceStatus::Disengaged.can_transition_to(DeviceStatus::Engaging));
        assert!(DeviceStatus::Engaging.can_transition_to(DeviceStatus::Engaged));
        assert!(DeviceStatus::Engaged.can_transition_to(DeviceStatus::Disengaging));
        assert!(DeviceStatus::Disengaging.can_transition_to(DeviceStatus::Disengaged));
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!DeviceStatus::Disengaged.can_transition_to(DeviceStatus::Engaged));
        assert!(!DeviceStatus::Engaged.can_transition_to(DeviceStatus::Engaging));
        assert!(!DeviceStatus::Engaged.can_transition_to(DeviceStatus::Disengaged));
    }
}
