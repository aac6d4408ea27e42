//! Index of the UI definitions and languages shipped under the content root.
//!
//! ```text
//! <content_root>/
//!   LANGS/<lang>/LC_MESSAGES/<module>.mo
//!   <module>/**/*.{ui,xml,glade}
//! ```

use std::io;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use deckard_protocol::{ContentListing, ModuleContent};

/// Directory holding the shipped catalogs.
pub const LANGS_DIR: &str = "LANGS";

const UI_EXTENSIONS: &[&str] = &["ui", "xml", "glade"];

/// Scans `root`. Hidden entries are skipped; everything is sorted.
pub fn scan_content(root: &Path) -> io::Result<ContentListing> {
    let langs = root.join(LANGS_DIR);
    let languages = if langs.is_dir() {
        subdirectories(&langs)?
    } else {
        Vec::new()
    };

    let mut modules = Vec::new();
    for name in subdirectories(root)? {
        if name == LANGS_DIR {
            continue;
        }
        let files = ui_files(&root.join(&name));
        modules.push(ModuleContent { name, files });
    }

    debug!(
        root = %root.display(),
        languages = languages.len(),
        modules = modules.len(),
        "Scanned content root"
    );
    Ok(ContentListing { languages, modules })
}

fn subdirectories(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

fn ui_files(module_dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(module_dir)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_ui_file(e.path()))
        .filter_map(|e| {
            e.path()
                .strip_prefix(module_dir)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();
    files
}

fn is_ui_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| UI_EXTENSIONS.contains(&ext.as_str()))
}
