//! Bundling of the switch footprint library into a generated project, so
//! the archive opens in KiCad on a machine without that library installed.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::GenerateError;

/// Location of the keyswitch libraries inside KiCad's third-party directory.
pub const SWITCH_LIBRARY_SUBDIR: &str = "footprints/com_github_perigoso_keyswitch-kicad-library";

/// Project-local `fp-lib-table` pointing `nickname` at the bundled copy.
pub fn fp_lib_table(nickname: &str) -> String {
    format!(
        "(fp_lib_table\n   (version 7)\n   (lib (name \"{nickname}\")(type \"KiCad\")(uri \"${{KIPRJMOD}}/footprints/{nickname}.pretty\")(options \"\")(descr \"\"))\n)\n"
    )
}

/// Copy `{switch_libraries}/{nickname}.pretty` into
/// `{project_dir}/footprints/` and write the matching `fp-lib-table`.
pub fn bundle_switch_footprints(
    project_dir: &Path,
    switch_libraries: &Path,
    nickname: &str,
) -> Result<(), GenerateError> {
    let library = format!("{nickname}.pretty");
    let src = switch_libraries.join(&library);
    if !src.is_dir() {
        return Err(GenerateError::FootprintLibrary(format!(
            "library {} does not exist",
            src.display()
        )));
    }

    let dst = project_dir.join("footprints").join(&library);
    copy_dir(&src, &dst).map_err(|e| {
        GenerateError::FootprintLibrary(format!("copying {}: {e}", src.display()))
    })?;

    fs::write(project_dir.join("fp-lib-table"), fp_lib_table(nickname))?;
    Ok(())
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
