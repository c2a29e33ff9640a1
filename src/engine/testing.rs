//! In-memory package files and mocks shared by the engine tests.

use anyhow::anyhow;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::archive::read_deb;
use crate::archive::testing::{build_deb, control_text};
use crate::backend::{MockPackageBackend, PackageQuery};
use crate::package::PackageMetadata;
use crate::runtime::MockRuntime;

const GIB: u64 = 1024 * 1024 * 1024;

pub fn deb(name: &str, version: &str, arch: &str) -> Vec<u8> {
    build_deb(&control_text(name, version, arch), &[])
}

/// Package files on a pretend filesystem, plus what is installed.
#[derive(Clone)]
pub struct Fixture {
    files: Arc<HashMap<PathBuf, Vec<u8>>>,
    installed: Arc<HashMap<String, String>>,
    free_space: Arc<AtomicU64>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            files: Arc::default(),
            installed: Arc::default(),
            free_space: Arc::new(AtomicU64::new(GIB)),
        }
    }

    pub fn with(mut self, path: &str, bytes: Vec<u8>) -> Self {
        Arc::make_mut(&mut self.files).insert(PathBuf::from(path), bytes);
        self
    }

    pub fn installed(mut self, name: &str, version: &str) -> Self {
        Arc::make_mut(&mut self.installed).insert(name.to_string(), version.to_string());
        self
    }

    pub fn with_free_space(self, bytes: u64) -> Self {
        self.set_free_space(bytes);
        self
    }

    /// Change the free space reported from now on, including to runtimes
    /// already handed out.
    pub fn set_free_space(&self, bytes: u64) {
        self.free_space.store(bytes, Ordering::SeqCst);
    }

    pub fn runtime(&self) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_canonicalize()
            .returning(|p| Ok(p.to_path_buf()));

        let files = self.files.clone();
        runtime
            .expect_is_file()
            .returning(move |p| files.contains_key(p));

        let files = self.files.clone();
        runtime.expect_open().returning(move |p| {
            let bytes = files
                .get(p)
                .cloned()
                .ok_or_else(|| anyhow!("{} not found", p.display()))?;
            Ok(Box::new(Cursor::new(bytes)) as Box<dyn std::io::Read + Send>)
        });

        let files = self.files.clone();
        runtime.expect_file_size().returning(move |p| {
            files
                .get(p)
                .map(|b| b.len() as u64)
                .ok_or_else(|| anyhow!("{} not found", p.display()))
        });

        let free_space = self.free_space.clone();
        runtime
            .expect_available_space()
            .returning(move |_| Ok(free_space.load(Ordering::SeqCst)));
        runtime.expect_is_privileged().returning(|| false);
        runtime
    }

    /// Backend that reads package files from the fixture and reports the
    /// given host architectures.
    pub fn backend(&self, host: &[&str]) -> MockPackageBackend {
        let mut backend = self.backend_without_host();
        let host: Vec<String> = host.iter().map(|s| s.to_string()).collect();
        backend
            .expect_host_architectures()
            .returning(move || Ok(host.clone()));
        backend
    }

    pub fn backend_without_host(&self) -> MockPackageBackend {
        let mut backend = MockPackageBackend::new();

        let files = self.files.clone();
        backend
            .expect_query()
            .returning(move |path| query_bytes(&files, path));

        let installed = self.installed.clone();
        backend
            .expect_installed_version()
            .returning(move |name, _| Ok(installed.get(name).cloned()));
        backend
    }
}

fn query_bytes(files: &HashMap<PathBuf, Vec<u8>>, path: &Path) -> anyhow::Result<PackageQuery> {
    let bytes = files
        .get(path)
        .cloned()
        .ok_or_else(|| anyhow!("{} not found", path.display()))?;
    let contents = read_deb(Cursor::new(bytes))?;
    let control = contents
        .control
        .as_deref()
        .ok_or_else(|| anyhow!("control member not readable"))?;
    Ok(PackageQuery {
        metadata: PackageMetadata::parse(control)?,
        signature_present: contents.has_signature(),
    })
}
