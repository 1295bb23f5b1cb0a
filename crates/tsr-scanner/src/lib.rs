//! Scanner/tokenizer for the tsr engine.
//!
//! Turns source text into a token stream with an EOF sentinel. The scanner
//! tracks line numbers, preserves literal values (numbers, strings, bigints),
//! splits template literals into head/middle/tail parts around their
//! substitutions, and disambiguates regex literals from division by the kind
//! of the previous token.

pub mod scanner;
pub mod token;

pub use scanner::Scanner;
pub use token::{Token, TokenKind, TokenLiteral};
