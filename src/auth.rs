use crate::status::Status;
use tracing::warn;

/// Request-level credential check. Runs before any registry lookup, so
/// an unauthorized caller learns nothing about what is registered.
pub struct AuthGate {
    secret: Option<String>,
}

impl AuthGate {
    /// `None` disables the check entirely.
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn authorize(&self, credential: Option<&str>) -> Result<(), Status> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };
        match credential {
            Some(given) if given == secret => Ok(()),
            _ => {
                warn!("rejected request with absent or mismatched credential");
                Err(Status::permission_denied())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Code;

    #[test]
    fn disabled_gate_admits_everyone() {
        let gate = AuthGate::new(None);
        assert!(gate.authorize(None).is_ok());
        assert!(gate.authorize(Some("anything")).is_ok());
    }

    #[test]
    fn enabled_gate_requires_exact_match() {
        let gate = AuthGate::new(Some("s3cret".into()));
        assert!(gate.authorize(Some("s3cret")).is_ok());
        assert!(gate.authorize(Some("S3CRET")).is_err());
        assert!(gate.authorize(Some("")).is_err());
        assert!(gate.authorize(None).is_err());
    }

    #[test]
    fn absent_and_wrong_read_identically() {
        let gate = AuthGate::new(Some("s3cret".into()));
        let absent = gate.authorize(None).unwrap_err();
        let wrong = gate.authorize(Some("nope")).unwrap_err();
        assert_eq!(absent, wrong);
        assert_eq!(absent.code, Code::PermissionDenied);
    }
}
