// Copyright 2025 Cornell University
// released under MIT License

pub mod automaton;
pub mod backends;
mod declaration;
pub mod description;
pub mod diagnostic;
pub mod errors;
pub mod interface;
pub mod ir;
pub mod parser;
pub mod peers;
pub mod serialize;

pub use declaration::Declaration;
