use thiserror::Error;

/// Conditions that abort a measurement run.
///
/// Everything that is recoverable (excluded nodes, unknown fingerprints,
/// receivers outside the candidate set) is handled as a silent no-op and
/// never surfaces here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("position oracle not set; attach one before signalling packets")]
    OracleUnset,

    #[error(
        "computed a PRR of {prr:.4} (> 1) for packet {fingerprint}: received {received}, \
         receivers in baseline {receivers}; check the simulation and supervisor configuration"
    )]
    PrrOutOfRange {
        fingerprint: String,
        prr: f64,
        received: u32,
        receivers: usize,
    },

    #[error("channel technology not set, choose between 80211p and nr")]
    TechnologyUnset,

    #[error("unknown channel technology '{0}', choose between 80211p and nr")]
    UnknownTechnology(String),

    #[error("unknown DCC policy '{0}', choose between reactive and adaptive")]
    UnknownPolicy(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("cannot start {component}: {missing} not set")]
    MissingPrerequisite {
        component: &'static str,
        missing: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
