use crate::error::MapperError;
use oxruler_common::types::{RuleFile, RuleGroup};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing;

/// Materialises a tenant's rule groups onto local disk, one YAML file
/// per group under `{rule_path}/{tenant}/`. The engines load their
/// rules from these paths, so a mapper write must complete before the
/// corresponding engine update.
pub struct RuleMapper {
    rule_path: PathBuf,
}

impl RuleMapper {
    pub fn new(rule_path: impl Into<PathBuf>) -> Self {
        Self {
            rule_path: rule_path.into(),
        }
    }

    /// Writes the tenant's file set, one file per group in the input
    /// order of `groups`, and returns whether anything on disk changed
    /// plus the file list in that same order. A file counts as changed
    /// when its content differs, when it is new, and when a stale file
    /// had to be removed.
    pub fn map_rules(
        &self,
        tenant: &str,
        groups: &[RuleGroup],
    ) -> Result<(bool, Vec<PathBuf>), MapperError> {
        let tenant_dir = self.rule_path.join(tenant);
        fs::create_dir_all(&tenant_dir).map_err(|source| MapperError::Io {
            path: tenant_dir.clone(),
            source,
        })?;

        let mut changed = false;
        let mut written: HashSet<String> = HashSet::with_capacity(groups.len());
        let mut files = Vec::with_capacity(groups.len());

        for group in groups {
            let document = RuleFile {
                groups: vec![group.clone()],
            };
            let content = serde_yaml::to_string(&document)
                .map_err(|source| MapperError::Serialize {
                    group: group.name.clone(),
                    source,
                })?
                .into_bytes();

            let name = file_name(&group.name);
            let path = tenant_dir.join(&name);
            let unchanged = matches!(fs::read(&path), Ok(existing) if existing == content);
            if unchanged {
                tracing::debug!(
                    tenant = %tenant,
                    file = %path.display(),
                    "Rule file is unchanged, skipping write"
                );
            } else {
                write_atomic(&tenant_dir, &path, &content)?;
                tracing::debug!(tenant = %tenant, file = %path.display(), "Rule file written");
                changed = true;
            }
            written.insert(name);
            files.push(path);
        }

        // Files for groups no longer present are removed.
        let entries = fs::read_dir(&tenant_dir).map_err(|source| MapperError::Io {
            path: tenant_dir.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| MapperError::Io {
                path: tenant_dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !written.contains(&name) {
                let path = entry.path();
                fs::remove_file(&path).map_err(|source| MapperError::Io {
                    path: path.clone(),
                    source,
                })?;
                tracing::debug!(
                    tenant = %tenant,
                    file = %path.display(),
                    "Removed stale rule file"
                );
                changed = true;
            }
        }

        Ok((changed, files))
    }

    /// Removes a deleted tenant's subtree. Failures are logged; the
    /// engine for the tenant is already gone at this point.
    pub fn cleanup_tenant(&self, tenant: &str) {
        let tenant_dir = self.rule_path.join(tenant);
        match fs::remove_dir_all(&tenant_dir) {
            Ok(()) => tracing::debug!(tenant = %tenant, "Removed local rule files"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(tenant = %tenant, error = %err, "Unable to remove local rule files")
            }
        }
    }

    /// Removes the entire scratch root at process shutdown.
    pub fn cleanup(&self) {
        match fs::remove_dir_all(&self.rule_path) {
            Ok(()) => tracing::debug!(path = %self.rule_path.display(), "Removed rule scratch area"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    path = %self.rule_path.display(),
                    error = %err,
                    "Unable to remove rule scratch area"
                )
            }
        }
    }
}

/// Group names are opaque; percent-encoding keeps the mapping to file
/// names injective and the names filesystem-safe.
fn file_name(group: &str) -> String {
    format!("{}.yaml", urlencoding::encode(group))
}

fn write_atomic(dir: &Path, path: &Path, content: &[u8]) -> Result<(), MapperError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|source| MapperError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    tmp.write_all(content).map_err(|source| MapperError::Io {
        path: tmp.path().to_path_buf(),
        source,
    })?;
    tmp.persist(path).map_err(|err| MapperError::Io {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}
