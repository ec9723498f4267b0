use std::path::PathBuf;

use kbtools_core::env::{optional, var_or};

/// Where the external tools and footprint libraries live.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub python_bin: String,
    pub kicad_cli_bin: String,
    /// KiCad's third-party content directory holding the switch libraries.
    pub kicad_3rdparty_dir: PathBuf,
    /// Stock KiCad footprint directory holding the diode libraries.
    pub diode_library_dir: PathBuf,
    /// Parent of the per-task working directories.
    pub work_root: PathBuf,
}

impl PipelineConfig {
    /// Load from environment variables.
    ///
    /// | Env var                   | Default                                 |
    /// |---------------------------|-----------------------------------------|
    /// | `PYTHON_BIN`              | `python3`                               |
    /// | `KICAD_CLI_BIN`           | `kicad-cli`                             |
    /// | `KICAD_3RDPARTY_DIR`      | `$HOME/.local/share/kicad/9.0/3rdparty` |
    /// | `KICAD_DIODE_LIBRARY_DIR` | `/usr/share/kicad/footprints/`          |
    /// | `WORK_DIR`                | system temp directory                   |
    pub fn from_env() -> Self {
        let kicad_3rdparty_dir = optional("KICAD_3RDPARTY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(var_or("HOME", "/root")).join(".local/share/kicad/9.0/3rdparty")
            });

        Self {
            python_bin: var_or("PYTHON_BIN", "python3"),
            kicad_cli_bin: var_or("KICAD_CLI_BIN", "kicad-cli"),
            kicad_3rdparty_dir,
            diode_library_dir: PathBuf::from(var_or(
                "KICAD_DIODE_LIBRARY_DIR",
                "/usr/share/kicad/footprints/",
            )),
            work_root: optional("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}
