//! Shadow ledger: exposure positions, breach checks, and hold lifecycle
//! (spec §4.3).

pub mod hold;
pub mod position;

pub use hold::{
    apply_hold_event, build_exposure_event, compute_exposure_hash, ExposureEvent,
    ExposureEventKind, HoldEvent, HoldState, HoldStateConflict,
};
pub use position::{check_breach, CheckResult, ClientLimits, Position};
