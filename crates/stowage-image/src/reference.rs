//! Image reference parsing and canonicalization.
//!
//! Two kinds of reference exist. [`ImageReference`] is what a registry pull
//! would store: `index.docker.io/library/alpine:latest`. [`CanonicalReference`]
//! is what an archive import stores: `load/library/alpine:latest`. The
//! `load/` prefix keeps the two name spaces disjoint.
//!
//! The name grammar is parsed with `nom`:
//!
//! ```text
//! reference  := [host "/"] path [":" tag]
//! host       := label ("." label)* [":" port]
//! label      := [A-Za-z0-9]+ ("-" [A-Za-z0-9]+)*
//! port       := [0-9]+
//! path       := component ("/" component)*
//! component  := [a-z0-9]+ ([._-] [a-z0-9]+)*
//! tag        := [A-Za-z0-9_] [A-Za-z0-9_.-]{0,127}
//! ```

use std::fmt;
use std::str::FromStr;

use nom::{
    IResult, Parser,
    bytes::complete::{take_while_m_n, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, opt, recognize},
    multi::{many0, separated_list1},
    sequence::{pair, preceded},
};
use serde::{Deserialize, Serialize};
use stowage_common::constants::{DEFAULT_LIBRARY, DEFAULT_REGISTRY, DEFAULT_TAG, LOAD_NAMESPACE};
use stowage_common::error::{Result, StowageError};
use stowage_common::types::Topology;

/// Longest accepted repository path, excluding host and tag.
const MAX_PATH_LEN: usize = 255;

const fn is_lower_alnum(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit()
}

const fn is_tag_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

const fn is_tag_continue(c: char) -> bool {
    is_tag_start(c) || c == '.' || c == '-'
}

/// One path component, e.g. `alpine` or `my-app.v2`.
fn component(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_lower_alnum),
        many0(pair(one_of("._-"), take_while1(is_lower_alnum))),
    ))
    .parse(input)
}

/// Slash-separated repository path.
fn path(input: &str) -> IResult<&str, Vec<&str>> {
    separated_list1(char('/'), component).parse(input)
}

/// Tag following the colon.
fn tag(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while_m_n(1, 1, is_tag_start),
        take_while_m_n(0, 127, is_tag_continue),
    ))
    .parse(input)
}

/// Path with an optional tag; the whole input must be consumed.
fn path_and_tag(input: &str) -> IResult<&str, (Vec<&str>, Option<&str>)> {
    all_consuming(pair(path, opt(preceded(char(':'), tag)))).parse(input)
}

/// One DNS label of a registry host.
fn label(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphanumeric()),
        many0(pair(char('-'), take_while1(|c: char| c.is_ascii_alphanumeric()))),
    ))
    .parse(input)
}

/// Registry host with an optional port; the whole input must be consumed.
fn host(input: &str) -> IResult<&str, &str> {
    all_consuming(recognize(pair(
        separated_list1(char('.'), label),
        opt(pair(char(':'), digit1)),
    )))
    .parse(input)
}

/// Folds a registry host into a single path component, `localhost:5000`
/// becoming `localhost_5000`.
fn fold_host(input: &str) -> Option<String> {
    let (_, matched) = host(input).ok()?;
    let folded = matched.to_ascii_lowercase().replace(':', "_");
    let valid = all_consuming(component).parse(folded.as_str()).is_ok();
    valid.then_some(folded)
}

/// Whether the first segment of a name designates a registry host.
fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

/// Parsed pieces of a user-supplied name.
#[derive(Debug)]
struct NameParts {
    input: String,
    /// Host as written (lowercased) and folded into a path component.
    host: Option<(String, String)>,
    components: Vec<String>,
    tag: String,
}

fn parse_name(input: &str) -> Result<NameParts> {
    let invalid = |reason: &str| StowageError::InvalidReference {
        reference: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("name is empty"));
    }
    if input.contains('@') {
        return Err(invalid("digest references are not supported"));
    }

    let (host, rest) = match input.split_once('/') {
        Some((first, rest)) if looks_like_host(first) => {
            let folded = fold_host(first).ok_or_else(|| {
                invalid("registry host must be dot-separated labels with an optional ':port'")
            })?;
            (Some((first.to_ascii_lowercase(), folded)), rest)
        }
        _ => (None, input),
    };

    let (_, (components, tag)) = path_and_tag(rest).map_err(|_| {
        invalid("expected lowercase path components separated by '/' and an optional ':tag'")
    })?;

    Ok(NameParts {
        input: input.to_string(),
        host,
        components: components.into_iter().map(str::to_string).collect(),
        tag: tag.unwrap_or(DEFAULT_TAG).to_string(),
    })
}

/// Rejects repository paths longer than [`MAX_PATH_LEN`].
fn check_length(input: &str, repository: &str) -> Result<()> {
    if repository.len() > MAX_PATH_LEN {
        return Err(StowageError::InvalidReference {
            reference: input.to_string(),
            reason: "repository path is too long".to_string(),
        });
    }
    Ok(())
}

/// Prepends `library/` to single-component paths.
fn with_library(mut components: Vec<String>) -> Vec<String> {
    if components.len() == 1 {
        components.insert(0, DEFAULT_LIBRARY.to_string());
    }
    components
}

/// A registry-qualified reference, as stored for pulled images.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry host, `index.docker.io` when the name has none.
    pub registry: String,
    /// Repository path inside the registry.
    pub repository: String,
    /// Image tag.
    pub tag: String,
}

impl ImageReference {
    /// Parses and normalizes a registry reference such as `alpine` or
    /// `quay.io/org/app:1.0`.
    ///
    /// # Errors
    ///
    /// Returns `StowageError::InvalidReference` for malformed names.
    pub fn parse(input: &str) -> Result<Self> {
        let parts = parse_name(input)?;
        let repository = with_library(parts.components).join("/");
        check_length(input, &repository)?;
        Ok(Self {
            registry: parts
                .host
                .map_or_else(|| DEFAULT_REGISTRY.to_string(), |(host, _)| host),
            repository,
            tag: parts.tag,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// The name under which an imported image is stored and looked up.
///
/// Always rendered as `load/<path>:<tag>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CanonicalReference {
    repository: String,
    tag: String,
}

impl CanonicalReference {
    /// Returns the namespace prefix shared by every loaded image.
    #[must_use]
    pub const fn namespace(&self) -> &'static str {
        LOAD_NAMESPACE
    }

    /// Returns the image path below the namespace, e.g. `library/alpine`.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn from_parts(parts: NameParts) -> Result<Self> {
        let mut components = parts.components;
        match parts.host {
            Some((_, folded)) => components.insert(0, folded),
            None if components.len() > 1 && components[0] == LOAD_NAMESPACE => {
                let _ = components.remove(0);
            }
            None => {}
        }
        let repository = with_library(components).join("/");
        check_length(&parts.input, &repository)?;
        Ok(Self {
            repository,
            tag: parts.tag,
        })
    }
}

impl fmt::Display for CanonicalReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{LOAD_NAMESPACE}/{}:{}", self.repository, self.tag)
    }
}

impl FromStr for CanonicalReference {
    type Err = StowageError;

    /// Parses an already canonical `load/...` reference.
    fn from_str(s: &str) -> Result<Self> {
        if !s.starts_with(&format!("{LOAD_NAMESPACE}/")) {
            return Err(StowageError::InvalidReference {
                reference: s.to_string(),
                reason: format!("canonical references start with '{LOAD_NAMESPACE}/'"),
            });
        }
        parse_name(s).and_then(Self::from_parts)
    }
}

impl TryFrom<String> for CanonicalReference {
    type Error = StowageError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CanonicalReference> for String {
    fn from(reference: CanonicalReference) -> Self {
        reference.to_string()
    }
}

/// Maps a user-supplied name to the reference an import under `topology`
/// is stored as.
///
/// The mapping is a pure function of its inputs. Both topologies use the
/// same naming; they are kept apart by their separate stores. Names that
/// are already canonical (`load/...`) map to themselves.
///
/// # Errors
///
/// Returns `StowageError::InvalidReference` for malformed names.
pub fn resolve(topology: Topology, short_name: &str) -> Result<CanonicalReference> {
    let reference = CanonicalReference::from_parts(parse_name(short_name)?)?;
    tracing::debug!(%topology, name = short_name, %reference, "resolved image name");
    Ok(reference)
}
