use std::{
    fs::OpenOptions,
    io::ErrorKind,
    path::Path,
    sync::OnceLock,
};

use regex::Regex;
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::config::Settings;
use crate::types::ItemMeta;

/// Build the output name for one item from the configured template.
///
/// The result is filesystem-safe or, failing that, the bare identifier.
/// This can degrade a name but never fail: every error path falls back to
/// the id, which is known to be a valid filename.
pub fn assemble_name(meta: &ItemMeta, settings: &Settings) -> String {
    let name = substitute(&settings.name_template, meta, &settings.tag_sep);
    let name = sanitize(&name, settings.allow_unicode);

    if name.is_empty() {
        return meta.id.clone();
    }

    if !usable_as_filename(&settings.output, &name) {
        warn!("Filename invalid or too long, falling back to '{}'", meta.id);
        return meta.id.clone();
    }

    name
}

fn substitute(template: &str, meta: &ItemMeta, tag_sep: &str) -> String {
    template
        .replace("%id%", &meta.id)
        .replace("%title%", &meta.title)
        // ':' is forbidden on Windows and awkward everywhere; the timestamp
        // stays readable with '-'
        .replace("%creation%", &meta.creation.replace(':', "-"))
        .replace("%channel%", &meta.channel)
        .replace("%community%", &meta.community)
        .replace("%tags%", &meta.tags.join(tag_sep))
}

/// Normalize per the Unicode policy, drop unsafe characters, and tidy up
/// the artifacts that stripping leaves behind.
fn sanitize(name: &str, allow_unicode: bool) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    static WORDLESS: OnceLock<Regex> = OnceLock::new();

    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^\w\s().,+-]").unwrap());
    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").unwrap());
    let wordless = WORDLESS.get_or_init(|| Regex::new(r"[^\w]|_").unwrap());

    let name: String = if allow_unicode {
        name.nfkc().collect()
    } else {
        // Compatibility decomposition first so accented letters degrade to
        // their base letter instead of vanishing entirely
        name.nfkd().filter(char::is_ascii).collect()
    };

    let name = unsafe_chars.replace_all(&name, " ");
    let name = whitespace.replace_all(&name, " ");

    // Nothing word-like left means the name would be all padding
    if wordless.replace_all(&name, "").is_empty() {
        return String::new();
    }

    // Reattach parentheses orphaned by stripped words
    let name = name.replace("( ", "(").replace(" )", ")");

    name.trim_matches(|c| matches!(c, '-' | '.' | ' ')).to_string()
}

/// Validate a candidate by creating (and removing) a zero-byte probe file
/// with a representative extension. Catches names the OS rejects, like
/// over-long ones, without guessing platform limits.
fn usable_as_filename(dir: &Path, name: &str) -> bool {
    let probe = dir.join(format!("{name}.ext"));

    match OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        // The name demonstrably works on this filesystem
        Err(e) if e.kind() == ErrorKind::AlreadyExists => true,
        Err(_) => false,
    }
}
