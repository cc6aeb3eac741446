//! Transcoder binary discovery.
//!
//! Search order for both ffmpeg and ffprobe: explicitly configured path →
//! project-local `ffmpeg/` install (binary placed directly, or a release
//! archive layout such as `ffmpeg-*/bin/`) → system PATH, verified with a
//! `-version` probe.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

fn binary_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_owned()
    }
}

/// Directories checked for a project-local install.
fn local_install_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            roots.push(dir.join("ffmpeg"));
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.join("ffmpeg"));
    }
    roots
}

fn find_in_local_install(base: &str) -> Option<PathBuf> {
    let name = binary_name(base);
    for root in local_install_roots() {
        let direct = root.join(&name);
        if direct.is_file() {
            return Some(direct);
        }
        // Release archives unpack to e.g. ffmpeg-master-latest-win64-gpl/bin/.
        let Ok(entries) = std::fs::read_dir(&root) else {
            continue;
        };
        for entry in entries.flatten() {
            let nested = entry.path().join("bin").join(&name);
            if nested.is_file() {
                return Some(nested);
            }
        }
    }
    None
}

/// Check that `candidate -version` runs and exits successfully.
fn version_probe(candidate: &Path) -> bool {
    Command::new(candidate)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn find_tool(base: &str, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        debug!(tool = base, path = %path.display(), "configured tool path does not exist");
    }
    if let Some(local) = find_in_local_install(base) {
        return Some(local);
    }
    let on_path = PathBuf::from(binary_name(base));
    version_probe(&on_path).then_some(on_path)
}

/// Locate the ffmpeg binary, or `None` when it is unavailable.
pub fn find_ffmpeg(configured: Option<&Path>) -> Option<PathBuf> {
    find_tool("ffmpeg", configured)
}

/// Locate ffprobe: configured path → sibling of the ffmpeg binary → local
/// install → PATH probe.
pub fn find_ffprobe(configured: Option<&Path>, ffmpeg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
    }
    if let Some(ffmpeg) = ffmpeg {
        if let Some(dir) = ffmpeg.parent() {
            if !dir.as_os_str().is_empty() {
                let sibling = dir.join(binary_name("ffprobe"));
                if sibling.is_file() {
                    return Some(sibling);
                }
            }
        }
    }
    find_tool("ffprobe", None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_path_wins_when_it_exists() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join(binary_name("ffmpeg"));
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(find_ffmpeg(Some(&fake)), Some(fake));
    }

    #[test]
    fn ffprobe_found_next_to_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let ffmpeg = dir.path().join(binary_name("ffmpeg"));
        let ffprobe = dir.path().join(binary_name("ffprobe"));
        std::fs::write(&ffmpeg, b"").unwrap();
        std::fs::write(&ffprobe, b"").unwrap();
        assert_eq!(find_ffprobe(None, Some(&ffmpeg)), Some(ffprobe));
    }
}
