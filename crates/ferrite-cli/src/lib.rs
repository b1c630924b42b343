//! Ferrite CLI library - shared functionality for testing and binary.

pub mod inspect;

use anyhow::{bail, Context, Result};
use ferrite_core::DataType;

/// Element type accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ElementType {
    F16,
    F32,
    F64,
    S32,
    S64,
    U8,
    U32,
    Pred,
}

impl From<ElementType> for DataType {
    fn from(element: ElementType) -> Self {
        match element {
            ElementType::F16 => DataType::F16,
            ElementType::F32 => DataType::F32,
            ElementType::F64 => DataType::F64,
            ElementType::S32 => DataType::I32,
            ElementType::S64 => DataType::I64,
            ElementType::U8 => DataType::U8,
            ElementType::U32 => DataType::U32,
            ElementType::Pred => DataType::Bool,
        }
    }
}

/// An `OUTPUT=PARAMETER` alias from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasArg {
    pub output: usize,
    pub parameter: usize,
}

/// Parse `OUTPUT=PARAMETER`, e.g. `0=2`.
pub fn parse_alias(s: &str) -> Result<AliasArg> {
    let Some((output, parameter)) = s.split_once('=') else {
        bail!("Invalid alias '{}', expected OUTPUT=PARAMETER", s);
    };
    let output = output
        .trim()
        .parse()
        .with_context(|| format!("Invalid output index in alias '{}'", s))?;
    let parameter = parameter
        .trim()
        .parse()
        .with_context(|| format!("Invalid parameter index in alias '{}'", s))?;
    Ok(AliasArg { output, parameter })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alias() {
        assert_eq!(
            parse_alias("0=2").unwrap(),
            AliasArg {
                output: 0,
                parameter: 2
            }
        );
        assert_eq!(parse_alias(" 1 = 0 ").unwrap().parameter, 0);
        assert!(parse_alias("2").is_err());
        assert!(parse_alias("a=1").is_err());
        assert!(parse_alias("1=-1").is_err());
    }
}
