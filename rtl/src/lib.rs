//! This library provides an in-memory circuit description builder for
//! synchronous digital hardware.
//!
//! A [`Design`] is a builder session: ordinary sequential Rust code declares
//! registers, wires, and register files, builds width-checked combinational
//! expressions over them with the [`Value`] algebra, and records conditional
//! writes under nested [`when`]/[`switch`] scopes. Writes are accumulated in
//! a log keyed by target element — an element may be read before the
//! statement that writes it, which permits same-cycle feedback — and every
//! read is resolved against the complete log only when the session is
//! consumed by [`into_netlist`]. Resolution turns each element's writes into
//! a priority multiplexer tree (first-listed write wins), and flattening
//! emits every reachable node exactly once into a dense, deduplicated
//! [`Netlist`] suitable for a downstream simulator or synthesizer.
//!
//! [`when`]: Design::when
//! [`switch`]: Design::switch
//! [`into_netlist`]: Design::into_netlist

mod cell;
mod design;
mod flatten;
mod logic;
mod value;

pub use cell::{Cell, DisplayItem, ElemId, FlipFlop};
pub use design::{Design, Pulse, Ram, Reg, Switch, Target, Wire};
pub use flatten::{Entry, Netlist};
pub use logic::Const;
pub use value::{Net, Value};
