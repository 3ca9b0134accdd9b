use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::enums::MountMode;

/// A bind-mount descriptor handed from a workspace to the sandbox engine.
///
/// Host and guest paths are identical: the engine and the workspace share
/// one filesystem namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub host_path: PathBuf,
    pub guest_path: PathBuf,
    pub mode: MountMode,
}

impl Volume {
    /// Format as Docker `-v` argument value: `host:guest:mode`.
    pub fn to_docker_arg(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.guest_path.display(),
            self.mode.as_docker_flag()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_docker_arg_format() {
        let volume = Volume {
            host_path: PathBuf::from("/host/path"),
            guest_path: PathBuf::from("/guest/path"),
            mode: MountMode::ReadWrite,
        };
        assert_eq!(volume.to_docker_arg(), "/host/path:/guest/path:rw");

        let ro = Volume {
            mode: MountMode::ReadOnly,
            ..volume
        };
        assert_eq!(ro.to_docker_arg(), "/host/path:/guest/path:ro");
    }
}
