use crate::CoreError;
use foundation_store::ServiceState;

pub fn validate_transition(from: ServiceState, to: ServiceState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (ServiceState::Absent, ServiceState::Registered)
            | (
                ServiceState::Registered | ServiceState::Built | ServiceState::Deployed,
                ServiceState::Built | ServiceState::Registered
            )
            | (
                ServiceState::Built | ServiceState::Deployed,
                ServiceState::Deployed
            )
            | (_, ServiceState::Absent)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(ServiceState::Absent, ServiceState::Registered).is_ok());
        assert!(validate_transition(ServiceState::Registered, ServiceState::Built).is_ok());
        assert!(validate_transition(ServiceState::Built, ServiceState::Built).is_ok()); // rebuild
        assert!(validate_transition(ServiceState::Deployed, ServiceState::Built).is_ok());
        assert!(validate_transition(ServiceState::Deployed, ServiceState::Registered).is_ok());
        assert!(validate_transition(ServiceState::Built, ServiceState::Deployed).is_ok());
        assert!(validate_transition(ServiceState::Deployed, ServiceState::Deployed).is_ok());
        assert!(validate_transition(ServiceState::Deployed, ServiceState::Absent).is_ok());
        assert!(validate_transition(ServiceState::Absent, ServiceState::Absent).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(ServiceState::Absent, ServiceState::Built).is_err());
        assert!(validate_transition(ServiceState::Absent, ServiceState::Deployed).is_err());
        assert!(validate_transition(ServiceState::Registered, ServiceState::Deployed).is_err());
    }

    #[test]
    fn failed_update_returns_to_registered() {
        for from in [
            ServiceState::Registered,
            ServiceState::Built,
            ServiceState::Deployed,
        ] {
            assert!(validate_transition(from, ServiceState::Registered).is_ok());
        }
    }
}
