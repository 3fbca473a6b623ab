//! Purpose: Static call metadata and argument validation.
//! Exports: `Param`, `CallDescriptor`.
//! Role: Arity and kind checks run here, before any native code is touched.
use serde::Serialize;

use crate::bridge::error::BridgeError;
use crate::bridge::value::{MarshaledValue, ValueKind};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Param {
    pub name: &'static str,
    pub kind: ValueKind,
}

impl Param {
    pub const fn new(name: &'static str, kind: ValueKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct CallDescriptor {
    pub name: &'static str,
    pub params: &'static [Param],
    pub returns: ValueKind,
    pub fallible: bool,
}

impl CallDescriptor {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn validate(&self, args: &[MarshaledValue]) -> Result<(), BridgeError> {
        if args.len() != self.params.len() {
            return Err(BridgeError::argument(format!(
                "{}() takes {} argument{} but {} {} given",
                self.name,
                self.params.len(),
                if self.params.len() == 1 { "" } else { "s" },
                args.len(),
                if args.len() == 1 { "was" } else { "were" }
            ))
            .with_operation(self.name));
        }
        for (param, arg) in self.params.iter().zip(args) {
            if arg.kind() != param.kind {
                return Err(BridgeError::argument(format!(
                    "argument `{}` must be {}, got {}",
                    param.name,
                    param.kind,
                    arg.kind()
                ))
                .with_operation(self.name));
            }
        }
        Ok(())
    }
}
