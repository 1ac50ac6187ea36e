//! Module interface files for separate compilation.
//!
//! After a successful elaboration the module's exported surface is written
//! to a `.vai` file; importers re-hydrate their environment from it instead
//! of re-elaborating the dependency. The format is version-tagged JSON with
//! `Vec`-based fields in declaration order, so regenerating from identical
//! source yields byte-identical output.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::path::Path;
use vaisto_types::{Scheme, Ty, TyVarId};

/// Bumped on any incompatible change; a mismatch forces re-elaboration.
pub const IFACE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInterface {
    pub version: u32,
    pub module: SmolStr,
    pub fns: Vec<IfaceFn>,
    pub types: Vec<IfaceType>,
    pub classes: Vec<IfaceClass>,
    pub instances: Vec<IfaceInstance>,
    pub processes: Vec<IfaceProcess>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceFn {
    pub name: SmolStr,
    pub scheme: Scheme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IfaceType {
    /// Sum declaration; `param_vars` are the normalized template variable
    /// ids that instantiation freshens.
    Sum {
        name: SmolStr,
        param_vars: Vec<TyVarId>,
        variants: Vec<(SmolStr, Vec<Ty>)>,
    },
    Record {
        name: SmolStr,
        fields: Vec<(SmolStr, Ty)>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceClass {
    pub name: SmolStr,
    /// Normalized id of the class type variable inside method signatures.
    pub class_var: TyVarId,
    pub methods: Vec<IfaceMethod>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceMethod {
    pub name: SmolStr,
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub has_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceInstance {
    pub class: SmolStr,
    /// Head constructor name: a primitive, `List`, or a sum/record name.
    pub head: SmolStr,
    pub head_arity: usize,
    /// Constraints as `(class, index into the head's type arguments)`.
    pub constraints: Vec<(SmolStr, usize)>,
    /// Whether the instance was synthesized by `deriving`.
    pub derived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IfaceProcess {
    pub name: SmolStr,
    pub state: Ty,
    /// Accepted message tags, sorted.
    pub msgs: Vec<SmolStr>,
}

#[derive(Debug, thiserror::Error)]
pub enum IfaceError {
    #[error("I/O error: {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("malformed interface file: {0}")]
    Malformed(String),

    #[error("interface version {found} is incompatible (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
}

impl ModuleInterface {
    /// Serialize to the on-disk representation. Deterministic: identical
    /// interfaces produce identical bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = serde_json::to_vec_pretty(self).expect("interface serialization");
        out.push(b'\n');
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IfaceError> {
        let iface: ModuleInterface =
            serde_json::from_slice(bytes).map_err(|e| IfaceError::Malformed(e.to_string()))?;
        if iface.version != IFACE_VERSION {
            return Err(IfaceError::VersionMismatch {
                found: iface.version,
                expected: IFACE_VERSION,
            });
        }
        Ok(iface)
    }

    pub fn save(&self, path: &Path) -> Result<(), IfaceError> {
        std::fs::write(path, self.to_bytes()).map_err(|e| IfaceError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> Result<Self, IfaceError> {
        let bytes = std::fs::read(path).map_err(|e| IfaceError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModuleInterface {
        ModuleInterface {
            version: IFACE_VERSION,
            module: SmolStr::new("geometry"),
            fns: vec![IfaceFn {
                name: SmolStr::new("area"),
                scheme: Scheme::mono(Ty::Fn(vec![Ty::Float, Ty::Float], Box::new(Ty::Float))),
            }],
            types: vec![IfaceType::Sum {
                name: SmolStr::new("Shape"),
                param_vars: vec![],
                variants: vec![
                    (SmolStr::new("Circle"), vec![Ty::Float]),
                    (SmolStr::new("Square"), vec![Ty::Float]),
                ],
            }],
            classes: vec![],
            instances: vec![IfaceInstance {
                class: SmolStr::new("Eq"),
                head: SmolStr::new("Shape"),
                head_arity: 0,
                constraints: vec![],
                derived: true,
            }],
            processes: vec![IfaceProcess {
                name: SmolStr::new("tracker"),
                state: Ty::Int,
                msgs: vec![SmolStr::new("reset"), SmolStr::new("tick")],
            }],
        }
    }

    #[test]
    fn round_trip() {
        let iface = sample();
        let bytes = iface.to_bytes();
        let loaded = ModuleInterface::from_bytes(&bytes).unwrap();
        assert_eq!(loaded.module, "geometry");
        assert_eq!(loaded.fns.len(), 1);
        assert_eq!(loaded.processes[0].msgs.len(), 2);
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let iface = sample();
        let bytes = iface.to_bytes();
        let again = ModuleInterface::from_bytes(&bytes).unwrap().to_bytes();
        assert_eq!(bytes, again);
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut iface = sample();
        iface.version = IFACE_VERSION + 1;
        let bytes = serde_json::to_vec(&iface).unwrap();
        match ModuleInterface::from_bytes(&bytes) {
            Err(IfaceError::VersionMismatch { found, expected }) => {
                assert_eq!(found, IFACE_VERSION + 1);
                assert_eq!(expected, IFACE_VERSION);
            }
            other => panic!("expected version mismatch, got {:?}", other.map(|i| i.module)),
        }
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            ModuleInterface::from_bytes(b"not json"),
            Err(IfaceError::Malformed(_))
        ));
    }
}
