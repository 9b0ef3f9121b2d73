//! Validated unit API paths.

use std::fmt;

use super::DispatchError;

/// Every fan-out endpoint lives under this prefix.
pub const UNIT_API_PREFIX: &str = "/unit_api";

/// A path on a unit's agent under [`UNIT_API_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitApiPath(String);

impl UnitApiPath {
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let rest = raw
            .strip_prefix(UNIT_API_PREFIX)
            .ok_or_else(|| DispatchError::ForbiddenEndpoint(raw.to_string()))?;
        let well_formed = (rest.is_empty() || rest.starts_with('/'))
            && !rest.split('/').any(|segment| segment == "..")
            && !raw.chars().any(char::is_whitespace);
        if !well_formed {
            return Err(DispatchError::ForbiddenEndpoint(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_unit_api_paths() {
        for path in [
            "/unit_api",
            "/unit_api/jobs/running",
            "/unit_api/jobs/stop/job_name/stirring?experiment=exp1",
        ] {
            assert!(UnitApiPath::parse(path).is_ok(), "{path}");
        }
    }

    #[test]
    fn rejects_other_prefixes() {
        for path in [
            "/api/workers",
            "unit_api/jobs",
            "/unit_apix/jobs",
            "/unit_api/../api/workers",
            "/unit_api/jobs running",
            "",
        ] {
            assert!(
                matches!(
                    UnitApiPath::parse(path),
                    Err(DispatchError::ForbiddenEndpoint(_))
                ),
                "{path}"
            );
        }
    }
}
