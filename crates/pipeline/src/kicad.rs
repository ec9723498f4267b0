//! KiCad project generation through external tools.
//!
//! Layout of a task's working directory:
//!
//! ```text
//! {workdir}/{project}/{project}.json        layout passed to the placer
//! {workdir}/{project}/{project}.kicad_pcb   board
//! {workdir}/{project}/{project}.kicad_sch   schematic
//! {workdir}/{project}/footprints/…          bundled switch library
//! {workdir}/logs/build.log                  placer output
//! {workdir}/logs/{front,back,schematic}.svg previews
//! ```

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kbtools_core::request::{Footprint, Settings, TaskRequest};

use crate::command;
use crate::config::PipelineConfig;
use crate::error::GenerateError;
use crate::footprints::{bundle_switch_footprints, SWITCH_LIBRARY_SUBDIR};
use crate::{ArtifactSet, ProjectGenerator};

/// Layers in the front preview.
pub const SVG_LAYERS_FRONT: &str = "F.Cu,F.SilkS,Edge.Cuts";

/// Layers in the back preview.
pub const SVG_LAYERS_BACK: &str = "B.Cu,B.SilkS,Edge.Cuts";

const PLACER: &str = "kbplacer";
const KICAD_CLI: &str = "kicad-cli";

/// [`ProjectGenerator`] backed by `python3 -m kbplacer` and `kicad-cli`.
pub struct KicadGenerator {
    config: PipelineConfig,
}

impl KicadGenerator {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    fn switch_libraries(&self) -> PathBuf {
        self.config.kicad_3rdparty_dir.join(SWITCH_LIBRARY_SUBDIR)
    }

    /// `{library dir}/{nickname}.pretty:{footprint}` as the placer expects.
    fn footprint_arg(library_dir: &Path, footprint: &Footprint) -> String {
        format!(
            "{}:{}",
            library_dir
                .join(format!("{}.pretty", footprint.library))
                .display(),
            footprint.name
        )
    }

    fn placer_args(&self, pcb: &Path, layout: &Path, settings: &Settings) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            PLACER.into(),
            "--pcb-file".into(),
            pcb.into(),
            "--create-sch-file".into(),
            "--create-pcb-file".into(),
            "--switch-footprint".into(),
            Self::footprint_arg(&self.switch_libraries(), &settings.switch_footprint).into(),
            "--diode-footprint".into(),
            Self::footprint_arg(&self.config.diode_library_dir, &settings.diode_footprint).into(),
            "--layout".into(),
            layout.into(),
            "--log-level".into(),
            "INFO".into(),
        ];
        if settings.routing.switches_with_diodes() {
            args.push("--route-switches-with-diodes".into());
        }
        if settings.routing.rows_and_columns() {
            args.push("--route-rows-and-columns".into());
        }
        args
    }

    async fn export_board_svg(
        &self,
        pcb: &Path,
        layers: &str,
        output: &Path,
    ) -> Result<(), GenerateError> {
        let args: Vec<OsString> = vec![
            "pcb".into(),
            "export".into(),
            "svg".into(),
            "--layers".into(),
            layers.into(),
            "--exclude-drawing-sheet".into(),
            "--fit-page-to-board".into(),
            "--mode-single".into(),
            "-o".into(),
            output.into(),
            pcb.into(),
        ];
        command::run(KICAD_CLI, &self.config.kicad_cli_bin, args).await?;
        if !output.is_file() {
            return Err(GenerateError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }

    /// Export the schematic and copy the result to `logs/schematic.svg`.
    ///
    /// `kicad-cli sch export` exits non-zero on harmless ERC warnings, so
    /// success is judged by the output file instead of the exit code.
    async fn export_schematic_svg(
        &self,
        schematic: &Path,
        logs_dir: &Path,
    ) -> Result<PathBuf, GenerateError> {
        let project_dir = schematic.parent().unwrap_or(logs_dir);
        let args: Vec<OsString> = vec![
            "sch".into(),
            "export".into(),
            "svg".into(),
            "--exclude-drawing-sheet".into(),
            "--output".into(),
            project_dir.into(),
            schematic.into(),
        ];

        match command::run(KICAD_CLI, &self.config.kicad_cli_bin, args).await {
            Ok(()) => {}
            Err(GenerateError::ToolFailed { exit_code, detail, .. }) => {
                tracing::warn!(?exit_code, %detail, "Schematic export reported an error");
            }
            Err(e) => return Err(e),
        }

        let exported = schematic.with_extension("svg");
        if !exported.is_file() {
            return Err(GenerateError::MissingOutput(exported));
        }
        let target = logs_dir.join("schematic.svg");
        tokio::fs::copy(&exported, &target).await?;
        Ok(target)
    }
}

#[async_trait]
impl ProjectGenerator for KicadGenerator {
    async fn generate(
        &self,
        task_id: &str,
        request: &TaskRequest,
    ) -> Result<ArtifactSet, GenerateError> {
        tokio::fs::create_dir_all(&self.config.work_root).await?;
        let workdir = tempfile::Builder::new()
            .prefix(&format!("{task_id}-"))
            .tempdir_in(&self.config.work_root)?;

        let name = &request.project_name;
        let project_dir = workdir.path().join(name);
        let logs_dir = workdir.path().join("logs");
        tokio::fs::create_dir(&project_dir).await?;
        tokio::fs::create_dir(&logs_dir).await?;

        let pcb = project_dir.join(format!("{name}.kicad_pcb"));
        let schematic = project_dir.join(format!("{name}.kicad_sch"));
        let layout = project_dir.join(format!("{name}.json"));

        let layout_json = serde_json::to_vec_pretty(&request.layout).map_err(io::Error::from)?;
        tokio::fs::write(&layout, layout_json).await?;

        tracing::info!(task_id, project = %name, workdir = %workdir.path().display(), "Running placement tool");
        command::run_logged(
            PLACER,
            &self.config.python_bin,
            self.placer_args(&pcb, &layout, &request.settings),
            &logs_dir.join("build.log"),
        )
        .await?;

        let libraries = self.switch_libraries();
        let nickname = request.settings.switch_footprint.library.clone();
        let bundle_into = project_dir.clone();
        tokio::task::spawn_blocking(move || {
            bundle_switch_footprints(&bundle_into, &libraries, &nickname)
        })
        .await
        .map_err(io::Error::other)??;

        let schematic_svg = self.export_schematic_svg(&schematic, &logs_dir).await?;

        let front = logs_dir.join("front.svg");
        self.export_board_svg(&pcb, SVG_LAYERS_FRONT, &front).await?;
        let back = logs_dir.join("back.svg");
        self.export_board_svg(&pcb, SVG_LAYERS_BACK, &back).await?;

        tracing::debug!(task_id, "Project generated");
        Ok(ArtifactSet {
            workdir,
            project_dir,
            renders: vec![("front", front), ("back", back), ("schematic", schematic_svg)],
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use assert_matches::assert_matches;
    use kbtools_core::request::Routing;
    use serde_json::json;

    use super::*;

    const FAKE_PLACER: &str = r#"#!/bin/sh
while [ $# -gt 0 ]; do
  case "$1" in
    --pcb-file) pcb="$2"; shift ;;
  esac
  shift
done
echo "placing switches"
echo "(kicad_pcb)" > "$pcb"
echo "(kicad_sch)" > "${pcb%.kicad_pcb}.kicad_sch"
"#;

    const FAKE_KICAD_CLI: &str = r#"#!/bin/sh
kind="$1"
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift ;;
    --output) outdir="$2"; shift ;;
  esac
  last="$1"
  shift
done
if [ "$kind" = "pcb" ]; then
  echo "<svg>pcb</svg>" > "$out"
else
  echo "<svg>sch</svg>" > "$outdir/$(basename "$last" .kicad_sch).svg"
fi
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: PipelineConfig,
    }

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let third_party = dir.path().join("3rdparty");
        let library = third_party.join(SWITCH_LIBRARY_SUBDIR).join("MX.pretty");
        fs::create_dir_all(&library).unwrap();
        fs::write(library.join("SW_MX_1u.kicad_mod"), "(footprint)").unwrap();

        let config = PipelineConfig {
            python_bin: script(dir.path(), "python", FAKE_PLACER),
            kicad_cli_bin: script(dir.path(), "kicad-cli", FAKE_KICAD_CLI),
            kicad_3rdparty_dir: third_party,
            diode_library_dir: PathBuf::from("/usr/share/kicad/footprints/"),
            work_root: dir.path().join("work"),
        };
        Fixture { _dir: dir, config }
    }

    fn request() -> TaskRequest {
        TaskRequest::from_value(&json!({
            "layout": {"meta": {"name": "My Board"}, "keys": []},
            "settings": {
                "switchFootprint": "MX:SW_MX_1u",
                "diodeFootprint": "Diode_SMD:D_SOD-123",
                "routing": "Switch-Diode only"
            }
        }))
        .unwrap()
    }

    #[test]
    fn placer_arguments_follow_settings() {
        let fixture = fixture();
        let generator = KicadGenerator::new(fixture.config.clone());
        let mut settings = request().settings;

        let args = generator.placer_args(Path::new("b.kicad_pcb"), Path::new("b.json"), &settings);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(&args[..2], ["-m", "kbplacer"]);
        assert!(args.contains(&"/usr/share/kicad/footprints/Diode_SMD.pretty:D_SOD-123".to_string()));
        assert!(args
            .iter()
            .any(|a| a.ends_with("keyswitch-kicad-library/MX.pretty:SW_MX_1u")));
        assert!(args.contains(&"--route-switches-with-diodes".to_string()));
        assert!(!args.contains(&"--route-rows-and-columns".to_string()));

        settings.routing = Routing::Disabled;
        let args = generator.placer_args(Path::new("b.kicad_pcb"), Path::new("b.json"), &settings);
        assert!(!args.iter().any(|a| a.to_string_lossy().starts_with("--route")));
    }

    #[tokio::test]
    async fn generates_project_with_previews() {
        let fixture = fixture();
        let generator = KicadGenerator::new(fixture.config.clone());

        let artifacts = generator.generate("task-1", &request()).await.unwrap();

        assert!(artifacts.project_dir.ends_with("My_Board"));
        assert!(artifacts.project_dir.join("My_Board.kicad_pcb").is_file());
        assert!(artifacts.project_dir.join("My_Board.json").is_file());
        assert!(artifacts.project_dir.join("fp-lib-table").is_file());
        assert!(artifacts
            .project_dir
            .join("footprints/MX.pretty/SW_MX_1u.kicad_mod")
            .is_file());

        let names: Vec<&str> = artifacts.renders.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["front", "back", "schematic"]);
        for (_, path) in &artifacts.renders {
            assert!(path.is_file(), "{} missing", path.display());
        }

        let root = artifacts.root();
        drop(artifacts);
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn placer_failure_is_retriable() {
        let mut fixture = fixture();
        fixture.config.python_bin = "false".into();
        let generator = KicadGenerator::new(fixture.config.clone());

        let err = generator.generate("task-2", &request()).await.unwrap_err();
        assert_matches!(err, GenerateError::ToolFailed { tool: "kbplacer", .. });
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn missing_switch_library_fails_generation() {
        let fixture = fixture();
        let generator = KicadGenerator::new(fixture.config.clone());
        let mut request = request();
        request.settings.switch_footprint.library = "Choc".into();

        assert_matches!(
            generator.generate("task-3", &request).await,
            Err(GenerateError::FootprintLibrary(_))
        );
    }
}
