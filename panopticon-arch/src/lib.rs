//! Architecture frontends.
//!
//! Rule tables over the disassembler combinators for the supported
//! architectures: AVR reads little-endian 16 bit words, x86/AMD64 reads
//! single bytes behind a chain of prefix sub-matchers.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod amd64;
pub mod avr;
