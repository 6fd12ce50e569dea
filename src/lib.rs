//! Acquisition and delay-tracking core for multi-line correlator arrays.
//!
//! The crate turns the raw packet stream of a hardware cross-correlator into
//! calibrated products: per-baseline geometric delay tracking, accumulated
//! correlation spectra over a requested integration, a live dirty-image
//! accumulator, and packaged FITS blobs at the end of each session. The
//! instrument-control protocol, the serial transport and the vendor packet
//! decoder all live outside; they reach this crate through the traits in
//! [`packet`] and [`acquire`].

pub mod accum;
pub mod acquire;
pub mod args;
pub mod array;
pub mod delay;
pub mod fits;
pub mod geom;
pub mod integrate;
pub mod packet;
pub mod plot;
pub mod report;
pub mod sim;
pub mod utils;
pub mod xml;
