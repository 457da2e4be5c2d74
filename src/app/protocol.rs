//! `nxm://` handler registration through an XDG desktop entry

use crate::nexus::NXM_SCHEME;
use crate::state::ProtocolRegistrar;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

const DESKTOP_FILE: &str = "modsync-nxm.desktop";

/// Writes `~/.local/share/applications/modsync-nxm.desktop` and, when asked to
/// become the default, points `x-scheme-handler/nxm` at it with `xdg-mime`.
pub struct DesktopRegistrar {
    applications_dir: PathBuf,
    exe: PathBuf,
}

impl DesktopRegistrar {
    pub fn new() -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the modsync executable")?;
        let dirs = directories::BaseDirs::new().context("Failed to locate the home directory")?;
        Ok(Self::with_paths(dirs.data_dir().join("applications"), exe))
    }

    pub fn with_paths(applications_dir: PathBuf, exe: PathBuf) -> Self {
        Self {
            applications_dir,
            exe,
        }
    }

    pub fn desktop_file(&self) -> PathBuf {
        self.applications_dir.join(DESKTOP_FILE)
    }

    fn desktop_entry(&self) -> String {
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=ModSync\n\
             Comment=Handle Nexus Mods download links\n\
             Exec=\"{}\" nxm %u\n\
             MimeType=x-scheme-handler/{};\n\
             NoDisplay=true\n\
             Terminal=false\n",
            self.exe.display(),
            NXM_SCHEME
        )
    }

    fn xdg_mime(args: &[&str]) -> Result<()> {
        let Ok(xdg_mime) = which::which("xdg-mime") else {
            tracing::warn!("xdg-mime not found, skipping default handler update");
            return Ok(());
        };

        let output = Command::new(&xdg_mime)
            .args(args)
            .output()
            .context("Failed to run xdg-mime")?;

        if !output.status.success() {
            bail!(
                "xdg-mime failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

impl ProtocolRegistrar for DesktopRegistrar {
    fn register(&self, make_default: bool) -> Result<()> {
        std::fs::create_dir_all(&self.applications_dir).with_context(|| {
            format!("Failed to create {}", self.applications_dir.display())
        })?;

        let path = self.desktop_file();
        std::fs::write(&path, self.desktop_entry())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());

        if make_default {
            let mime = format!("x-scheme-handler/{}", NXM_SCHEME);
            Self::xdg_mime(&["default", DESKTOP_FILE, &mime])?;
        }
        Ok(())
    }

    fn deregister(&self, scheme: &str) -> Result<()> {
        if !scheme.eq_ignore_ascii_case(NXM_SCHEME) {
            bail!("Only the {} scheme is handled, not {}", NXM_SCHEME, scheme);
        }

        let path = self.desktop_file();
        if remove_if_exists(&path)? {
            tracing::info!("Removed {}", path.display());
        }
        Ok(())
    }
}
