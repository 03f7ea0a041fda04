use crate::gateway::{Venue, VenueError};

/// Engine-level failures. Anything that threatens position consistency
/// surfaces here and drives the supervisor into ERROR; the venue-local
/// kinds stay inside `VenueError`.
#[derive(Debug)]
pub enum EngineError {
    /// Rounded pair size is zero or below the per-venue minimum.
    SizeTooSmall { size: f64, min_required: f64 },
    /// One open leg filled, the other failed. Never auto-unwound;
    /// the operator reconciles with the emergency-exit tool.
    PartialFill {
        filled: Venue,
        failed: Venue,
        source: VenueError,
    },
    /// One or both close legs left residual size on a venue.
    PartialClose { still_open: Vec<(Venue, f64)> },
    /// No usable mid price on either venue at open time.
    NoReferencePrice { symbol: String },
    Venue(VenueError),
    Persistence(std::io::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SizeTooSmall { size, min_required } => write!(
                f,
                "pair size too small: {:.8} (minimum {:.8})",
                size, min_required
            ),
            EngineError::PartialFill { filled, failed, source } => write!(
                f,
                "partial fill: {} leg placed, {} leg failed: {}",
                filled, failed, source
            ),
            EngineError::PartialClose { still_open } => {
                write!(f, "partial close, residual size on:")?;
                for (venue, size) in still_open {
                    write!(f, " {}={:+.6}", venue, size)?;
                }
                Ok(())
            }
            EngineError::NoReferencePrice { symbol } => {
                write!(f, "no reference price available for {}", symbol)
            }
            EngineError::Venue(e) => write!(f, "{}", e),
            EngineError::Persistence(e) => write!(f, "state persistence failed: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::PartialFill { source, .. } => Some(source),
            EngineError::Venue(e) => Some(e),
            EngineError::Persistence(e) => Some(e),
            _ => None,
        }
    }
}

impl From<VenueError> for EngineError {
    fn from(e: VenueError) -> Self {
        EngineError::Venue(e)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(e)
    }
}
