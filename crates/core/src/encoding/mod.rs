//! Per-value encryption helpers used by the translators.
//!
//! [`IdatEncoder`] protects local identifiers, [`MdatEncoder`] protects medical data cells.

mod idat;
mod mdat;

pub use idat::{IdatEncoder, TtpId};
pub use mdat::MdatEncoder;
