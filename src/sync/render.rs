use crate::sync::{ConfigTemplate, RenderContext, ServiceAddress, ServiceSubscription};
use crate::{Result, SyncError};
use log::{debug, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const PENDING_SUFFIX: &str = "pending";
const BACKUP_SUFFIX: &str = "bak";

pub struct ConfigRenderer {
    output_dir: PathBuf,
    template: ConfigTemplate,
}

impl ConfigRenderer {
    pub fn new(output_dir: impl Into<PathBuf>, template: ConfigTemplate) -> ConfigRenderer {
        ConfigRenderer {
            output_dir: output_dir.into(),
            template,
        }
    }

    /// Wipes the output directory and recreates it empty.
    pub fn reset_output_dir(&self) -> Result<()> {
        let to_err = |source| SyncError::OutputDir {
            path: self.output_dir.clone(),
            source,
        };

        if self.output_dir.exists() {
            fs::remove_dir_all(&self.output_dir).map_err(to_err)?;
        }
        fs::create_dir_all(&self.output_dir).map_err(to_err)?;

        info!("Output directory {} recreated", self.output_dir.display());
        Ok(())
    }

    pub fn path_for(&self, subscription: &ServiceSubscription) -> PathBuf {
        self.output_dir.join(subscription.file_name())
    }

    /// Renders straight into the live file of the subscription.
    #[cfg(test)]
    pub fn render(&self, service: &str, addresses: &[ServiceAddress], subscription: &ServiceSubscription) -> Result<PathBuf> {
        let path = self.path_for(subscription);
        self.render_to(&path, service, addresses, subscription)?;
        Ok(path)
    }

    /// Renders every item next to its live file without touching the live
    /// files. Either every item is staged or none is.
    pub fn stage<'a, I>(&self, items: I) -> Result<RenderBatch>
    where
        I: IntoIterator<Item = (&'a str, &'a [ServiceAddress], &'a ServiceSubscription)>,
    {
        let mut batch = RenderBatch { files: Vec::new() };

        for (service, addresses, subscription) in items {
            let target = self.path_for(subscription);
            let pending = with_suffix(&target, PENDING_SUFFIX);

            if let Err(e) = self.render_to(&pending, service, addresses, subscription) {
                let _ = fs::remove_file(&pending);
                batch.discard();
                return Err(e);
            }

            batch.files.push(StagedFile {
                backup: with_suffix(&target, BACKUP_SUFFIX),
                target,
                pending,
            });
        }

        Ok(batch)
    }

    fn render_to(&self, path: &Path, service: &str, addresses: &[ServiceAddress], subscription: &ServiceSubscription) -> Result<()> {
        let ctx = RenderContext {
            service_name: service,
            addresses,
            server_name: &subscription.server_name,
            port: subscription.port,
            upstream_name: &subscription.upstream,
        };
        let content = self.template.render(&ctx)?;

        let to_err = |source| SyncError::Render {
            path: path.to_owned(),
            source,
        };
        let mut file = fs::File::create(path).map_err(to_err)?;
        file.write_all(content.as_bytes()).map_err(to_err)?;
        file.sync_all().map_err(to_err)?;
        set_readable(&file).map_err(to_err)?;

        debug!(
            "Rendered {} for {} with addresses {}",
            path.display(),
            service,
            serde_json::to_string(addresses).unwrap_or_default()
        );
        Ok(())
    }
}

#[cfg(unix)]
fn set_readable(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_readable(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Debug)]
struct StagedFile {
    target: PathBuf,
    pending: PathBuf,
    backup: PathBuf,
}

/// Rendered files waiting to replace the live ones.
#[derive(Debug)]
pub struct RenderBatch {
    files: Vec<StagedFile>,
}

impl RenderBatch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn targets(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.target.as_path()).collect()
    }

    /// Moves every staged file into place, keeping the previous live file as
    /// a backup. A failure part way restores what was already moved.
    pub fn commit(self) -> Result<CommittedBatch> {
        let mut committed = CommittedBatch { files: Vec::new() };
        let mut remaining = self.files.into_iter();

        while let Some(staged) = remaining.next() {
            if let Err(source) = swap_in(&staged) {
                let path = staged.target.clone();

                let _ = fs::remove_file(&staged.pending);
                for rest in remaining {
                    let _ = fs::remove_file(&rest.pending);
                }
                if let Err(e) = committed.rollback() {
                    warn!("Restoring previous files after failed commit: {}", e);
                }

                return SyncError::Render { path, source }.into();
            }

            let had_previous = staged.backup.exists();
            committed.files.push(SwappedFile {
                target: staged.target,
                backup: if had_previous { Some(staged.backup) } else { None },
            });
        }

        Ok(committed)
    }

    pub fn discard(self) {
        for staged in self.files {
            if let Err(e) = fs::remove_file(&staged.pending) {
                warn!("Failed to remove {}: {}", staged.pending.display(), e);
            }
        }
    }
}

fn swap_in(staged: &StagedFile) -> std::io::Result<()> {
    if staged.target.exists() {
        fs::rename(&staged.target, &staged.backup)?;
    }

    if let Err(e) = fs::rename(&staged.pending, &staged.target) {
        if staged.backup.exists() {
            let _ = fs::rename(&staged.backup, &staged.target);
        }
        return Err(e);
    }

    Ok(())
}

#[derive(Debug)]
struct SwappedFile {
    target: PathBuf,
    backup: Option<PathBuf>,
}

/// Files that are live, with the previous versions still on disk.
#[derive(Debug)]
pub struct CommittedBatch {
    files: Vec<SwappedFile>,
}

impl CommittedBatch {
    /// Keeps the new files and drops the backups.
    pub fn finalize(self) {
        for file in self.files {
            if let Some(backup) = file.backup {
                if let Err(e) = fs::remove_file(&backup) {
                    warn!("Failed to remove backup {}: {}", backup.display(), e);
                }
            }
        }
    }

    /// Puts the previous files back. Files that did not exist before are removed.
    pub fn rollback(self) -> Result<()> {
        for file in self.files.into_iter().rev() {
            let res = match &file.backup {
                Some(backup) => fs::rename(backup, &file.target),
                None => fs::remove_file(&file.target),
            };

            res.map_err(|source| SyncError::Render {
                path: file.target.clone(),
                source,
            })?;
            info!("Restored previous state of {}", file.target.display());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServiceIdentity;
    use tempfile::tempdir;

    fn subscription(name: &str, upstream: &str) -> ServiceSubscription {
        ServiceSubscription {
            name: name.to_owned(),
            identity: ServiceIdentity::new("G", name),
            server_name: format!("{}.local", name),
            port: 80,
            upstream: upstream.to_owned(),
        }
    }

    fn address(ip: &str) -> ServiceAddress {
        ServiceAddress { ip: ip.to_owned(), port: 8080, weight: 1 }
    }

    #[test]
    fn reset_wipes_existing_files() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("conf.d");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.conf"), "old").unwrap();

        let renderer = ConfigRenderer::new(&out, ConfigTemplate::default());
        renderer.reset_output_dir().unwrap();

        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn renders_file_named_after_upstream() {
        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let sub = subscription("svc1", "svc1-up");

        let path = renderer.render("svc1", &[address("10.0.0.1")], &sub).unwrap();

        assert_eq!(path, dir.path().join("svc1-up.conf"));
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.matches("server 10.0.0.1:8080").count(), 1);
    }

    #[test]
    fn empty_address_set_still_renders() {
        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let sub = subscription("svc1", "svc1-up");

        let path = renderer.render("svc1", &[], &sub).unwrap();
        let content = fs::read_to_string(path).unwrap();

        assert!(content.contains("upstream svc1-up {"));
        assert!(!content.contains("    server "));
    }

    #[test]
    fn rendering_is_deterministic() {
        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let sub = subscription("svc1", "svc1-up");
        let addrs = vec![address("10.0.0.1"), address("10.0.0.2")];

        let path = renderer.render("svc1", &addrs, &sub).unwrap();
        let first = fs::read(&path).unwrap();
        renderer.render("svc1", &addrs, &sub).unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn rendered_file_is_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let path = renderer.render("svc1", &[], &subscription("svc1", "svc1-up")).unwrap();

        let mode = fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn stage_does_not_touch_live_files_until_commit() {
        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let sub = subscription("svc1", "svc1-up");
        let live = renderer.render("svc1", &[address("10.0.0.1")], &sub).unwrap();

        let addrs = vec![address("10.0.0.9")];
        let batch = renderer.stage(vec![("svc1", addrs.as_slice(), &sub)]).unwrap();
        assert!(fs::read_to_string(&live).unwrap().contains("10.0.0.1"));

        let committed = batch.commit().unwrap();
        assert!(fs::read_to_string(&live).unwrap().contains("10.0.0.9"));

        committed.finalize();
        let names: Vec<String> = fs::read_dir(dir.path()).unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["svc1-up.conf".to_owned()]);
    }

    #[test]
    fn rollback_restores_previous_and_removes_new() {
        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let old = subscription("svc1", "svc1-up");
        let new = subscription("svc2", "svc2-up");
        let live = renderer.render("svc1", &[address("10.0.0.1")], &old).unwrap();

        let addrs = vec![address("10.0.0.9")];
        let batch = renderer.stage(vec![
            ("svc1", addrs.as_slice(), &old),
            ("svc2", addrs.as_slice(), &new),
        ]).unwrap();
        batch.commit().unwrap().rollback().unwrap();

        assert!(fs::read_to_string(&live).unwrap().contains("10.0.0.1"));
        assert!(!renderer.path_for(&new).exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_stage_leaves_no_pending_files() {
        let dir = tempdir().unwrap();
        let renderer = ConfigRenderer::new(dir.path(), ConfigTemplate::default());
        let good = subscription("svc1", "svc1-up");
        // Upstream pointing into a missing directory cannot be created
        let bad = subscription("svc2", "missing/svc2-up");
        let none: &[ServiceAddress] = &[];

        let res = renderer.stage(vec![("svc1", none, &good), ("svc2", none, &bad)]);

        assert!(matches!(res, Err(SyncError::Render { .. })));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
