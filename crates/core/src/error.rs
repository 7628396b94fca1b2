use std::fmt;

/// Construction-time validation failure for a frequency filter.
///
/// Every variant carries the name of the filter that rejected its arguments
/// so the message reads the way a host would print it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Radius outside `[1, MAX_RADIUS]`.
    InvalidRadius { filter: &'static str, radius: i64 },
    /// Clip format or dimensions vary from frame to frame.
    VariableFormat { filter: &'static str },
    /// Neither 8-16 bit integer nor 32 bit float samples.
    UnsupportedFormat { filter: &'static str, format: String },
    /// Base and detail clips disagree on format or dimensions.
    FormatMismatch {
        filter: &'static str,
        base: String,
        detail: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRadius { filter, radius } if *radius < 1 => {
                write!(f, "{filter}: radius must be >= 1 (got {radius})")
            }
            Self::InvalidRadius { filter, radius } => write!(
                f,
                "{filter}: radius must be <= {} (got {radius})",
                crate::convolution::MAX_RADIUS
            ),
            Self::VariableFormat { filter } => write!(
                f,
                "{filter}: only clips with constant format and dimensions are accepted"
            ),
            Self::UnsupportedFormat { filter, format } => write!(
                f,
                "{filter}: only 8-16 bit integer or 32 bit float input are accepted (got {format})"
            ),
            Self::FormatMismatch {
                filter,
                base,
                detail,
            } => write!(
                f,
                "{filter}: base and detail must have the same format and dimensions \
                 (base {base}, detail {detail})"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn radius_messages_name_the_violated_bound() {
        let low = ConfigError::InvalidRadius {
            filter: "ExtractFrequency",
            radius: 0,
        };
        assert_eq!(
            low.to_string(),
            "ExtractFrequency: radius must be >= 1 (got 0)"
        );

        let high = ConfigError::InvalidRadius {
            filter: "ExtractFrequency",
            radius: 99,
        };
        assert!(high.to_string().contains("radius must be <="));
    }

    #[test]
    fn config_error_survives_anyhow_downcast() {
        let err: anyhow::Error = ConfigError::VariableFormat {
            filter: "ReplaceFrequency",
        }
        .into();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::VariableFormat {
                filter: "ReplaceFrequency"
            })
        );
    }
}
