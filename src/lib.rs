//! In-process debugger visibility probes.
//!
//! See [`probe`] for the engine. The `dbgprobe` binary wires it to the
//! console.

pub mod probe;
