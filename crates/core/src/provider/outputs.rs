//! Discovery of reconstruction outputs in the output tree.

use std::io;
use std::path::{Path, PathBuf};

use crate::process::ExecutionError;

/// Mesh formats, most preferred first.
const MESH_EXTENSIONS: &[&str] = &["gltf", "glb", "obj"];

const TEXTURE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Files a mesh references and needs next to it (glTF buffers, OBJ materials).
const COMPANION_EXTENSIONS: &[&str] = &["bin", "mtl"];

/// Files selected for publication after a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSet {
    pub mesh: PathBuf,
    pub textures: Vec<PathBuf>,
    pub companions: Vec<PathBuf>,
}

impl OutputSet {
    /// Mesh file extension including the dot, e.g. `.gltf`.
    pub fn mesh_extension(&self) -> String {
        self.mesh
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default()
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Collect every regular file under `dir`, sorted for deterministic selection.
fn walk(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Pick the mesh, textures and companions from `output_dir`.
///
/// Fails with [`ExecutionError::MissingOutput`] when no mesh exists, even
/// though the process exited cleanly.
pub fn locate_outputs(output_dir: &Path) -> Result<OutputSet, ExecutionError> {
    let files = walk(output_dir)?;

    let mesh = MESH_EXTENSIONS
        .iter()
        .find_map(|wanted| {
            files
                .iter()
                .find(|f| extension_of(f).as_deref() == Some(*wanted))
        })
        .cloned()
        .ok_or(ExecutionError::MissingOutput)?;

    let with_extension = |allowed: &[&str]| -> Vec<PathBuf> {
        files
            .iter()
            .filter(|f| {
                extension_of(f)
                    .map(|e| allowed.contains(&e.as_str()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    };

    Ok(OutputSet {
        textures: with_extension(TEXTURE_EXTENSIONS),
        companions: with_extension(COMPANION_EXTENSIONS),
        mesh,
    })
}
