//! Mark-sweep collection over the strings of a [`object::StringHeap`].
//!
//! The collector is decoupled from any specific VM. Consumers provide a
//! [`RootProvider`] that enumerates the live string handles at collection
//! time; the registry decides which of the unreached ones it may free.

mod gc;

pub use gc::*;
