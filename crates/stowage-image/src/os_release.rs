//! Human-readable image identity from `os-release`.
//!
//! `/etc/os-release` is usually a symlink to `/usr/lib/os-release`, and an
//! upper layer may delete or replace either. The search walks layers from
//! the top down and settles each path the first time a layer mentions it.

use std::io::Read;

/// Primary location of the file inside an image.
pub const ETC_OS_RELEASE: &str = "etc/os-release";

/// Fallback location, the usual target of the `/etc` symlink.
pub const USR_OS_RELEASE: &str = "usr/lib/os-release";

/// Extracts `PRETTY_NAME`, falling back to `NAME VERSION_ID`.
#[must_use]
pub fn pretty_name(content: &str) -> Option<String> {
    let mut name = None;
    let mut version = None;
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = unquote(value.trim());
        match key.trim() {
            "PRETTY_NAME" if !value.is_empty() => return Some(value.to_string()),
            "NAME" => name = Some(value),
            "VERSION_ID" => version = Some(value),
            _ => {}
        }
    }
    match (name, version) {
        (Some(name), Some(version)) => Some(format!("{name} {version}")),
        (Some(name), None) => Some(name.to_string()),
        _ => None,
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// What the layers seen so far say about one path.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Unknown,
    Content(String),
    /// Present but not a regular file, typically a symlink.
    Indirect,
    Deleted,
}

/// Top-down search state across layers.
#[derive(Debug)]
pub struct OsReleaseSearch {
    etc: Slot,
    usr: Slot,
}

impl Default for OsReleaseSearch {
    fn default() -> Self {
        Self::new()
    }
}

impl OsReleaseSearch {
    /// Starts a search with nothing known.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            etc: Slot::Unknown,
            usr: Slot::Unknown,
        }
    }

    /// Feeds the entries of the next lower layer.
    ///
    /// # Errors
    ///
    /// Propagates errors from reading the layer tar stream.
    pub fn scan_layer<R: Read>(&mut self, layer: R) -> std::io::Result<()> {
        let mut etc = Slot::Unknown;
        let mut usr = Slot::Unknown;
        let mut opaque_etc = false;
        let mut opaque_usr = false;

        let mut archive = tar::Archive::new(layer);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.to_string_lossy().into_owned();
            let path = path.trim_start_matches("./").trim_start_matches('/');
            match path {
                ETC_OS_RELEASE | USR_OS_RELEASE => {
                    let slot = if entry.header().entry_type().is_file() {
                        let mut content = String::new();
                        let _ = entry.read_to_string(&mut content)?;
                        Slot::Content(content)
                    } else {
                        Slot::Indirect
                    };
                    if path == ETC_OS_RELEASE {
                        etc = slot;
                    } else {
                        usr = slot;
                    }
                }
                "etc/.wh.os-release" => etc = Slot::Deleted,
                "usr/lib/.wh.os-release" => usr = Slot::Deleted,
                "etc/.wh..wh..opq" => opaque_etc = true,
                "usr/lib/.wh..wh..opq" => opaque_usr = true,
                _ => {}
            }
        }

        if etc == Slot::Unknown && opaque_etc {
            etc = Slot::Deleted;
        }
        if usr == Slot::Unknown && opaque_usr {
            usr = Slot::Deleted;
        }
        settle(&mut self.etc, etc);
        settle(&mut self.usr, usr);
        Ok(())
    }

    /// Whether lower layers can no longer change the outcome.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        match (&self.etc, &self.usr) {
            (Slot::Content(_), _) => true,
            (Slot::Unknown, _) => false,
            (_, usr) => !matches!(usr, Slot::Unknown),
        }
    }

    /// Returns the pretty name found, if any.
    #[must_use]
    pub fn finish(self) -> Option<String> {
        let content = match (self.etc, self.usr) {
            (Slot::Content(content), _) | (_, Slot::Content(content)) => content,
            _ => return None,
        };
        pretty_name(&content)
    }
}

/// Upper layers win: only an unknown slot takes the lower layer's answer.
fn settle(slot: &mut Slot, lower: Slot) {
    if *slot == Slot::Unknown {
        *slot = lower;
    }
}
