//! A concurrent hash-set benchmarking laboratory.
//!
//! Five concurrent set algorithms behind the [`set::ConcurrentSet`]
//! interface, two memory reclaimers behind [`reclaim::Reclaimer`], a
//! multi-word CAS engine in [`kcas`], and the benchmark harness under
//! [`bench`].

#[macro_use]
extern crate cfg_if;

mod util;

pub mod key;
pub mod lock;
pub mod reclaim;

pub mod kcas;

pub mod set;

pub mod chaining;
pub mod hopscotch;
pub mod linear_probe;
pub mod robin_hood_elided;
pub mod robin_hood_kcas;

pub mod bench;
