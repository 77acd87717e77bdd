use crate::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// The repository of the official WireMock image on Docker Hub.
pub const OFFICIAL_IMAGE_NAME: &str = "wiremock/wiremock";
/// The tag used when none is specified.
pub const DEFAULT_TAG: &str = "latest";
/// The port WireMock listens on inside the official image.
pub const WIREMOCK_HTTP_PORT: u16 = 8080;
/// The oldest WireMock release the official image conventions (paths, CLI flags) apply to.
pub const MINIMUM_SUPPORTED_VERSION: (u64, u64, u64) = (2, 0, 0);

// `repository[:tag][@digest]`. The repository may contain a registry host with a port
// (e.g. `localhost:5000/wiremock/wiremock`), so the tag is whatever follows the last `:`
// that is not followed by a `/`.
static REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<repository>[^@]+?)(?::(?P<tag>[\w][\w.-]*))?(?:@(?P<digest>[A-Za-z0-9_+.-]+:[A-Fa-f0-9]+))?$")
        .expect("The image reference regex is valid")
});

static VERSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.(?P<patch>\d+))?(?:[-+].*)?$")
        .expect("The image version regex is valid")
});

/// The container image to run, together with the ports it exposes.
///
/// An `ImageSpec` is immutable once built: use [`ImageSpec::new`] or [`ImageSpec::parse`] and
/// chain the `with_*` methods before handing it over to a [`ContainerHandle`].
///
/// ### Example:
/// ```rust
/// use wiremock_container::ImageSpec;
///
/// let image = ImageSpec::parse("wiremock/wiremock:3.3.1").unwrap();
/// assert_eq!(image.repository(), "wiremock/wiremock");
/// assert_eq!(image.tag(), "3.3.1");
/// assert!(image.exposed_ports().contains(&8080));
/// ```
///
/// [`ContainerHandle`]: crate::ContainerHandle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    repository: String,
    tag: String,
    digest: Option<String>,
    exposed_ports: BTreeSet<u16>,
}

impl ImageSpec {
    /// Build an `ImageSpec` from explicit fields. It exposes [`WIREMOCK_HTTP_PORT`] by default.
    ///
    /// It fails if `repository` is empty, or if it points to a version of the official image
    /// older than [`MINIMUM_SUPPORTED_VERSION`].
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Result<Self, Error> {
        let repository = repository.into().trim().to_owned();
        let tag = tag.into().trim().to_owned();
        if repository.is_empty() {
            return Err(Error::Configuration(
                "The image repository cannot be empty".into(),
            ));
        }
        let tag = if tag.is_empty() {
            DEFAULT_TAG.to_owned()
        } else {
            tag
        };
        if repository == OFFICIAL_IMAGE_NAME {
            check_official_version(&tag)?;
        }
        Ok(Self {
            repository,
            tag,
            digest: None,
            exposed_ports: BTreeSet::from([WIREMOCK_HTTP_PORT]),
        })
    }

    /// The official WireMock image, with the given tag.
    pub fn official(tag: impl Into<String>) -> Result<Self, Error> {
        Self::new(OFFICIAL_IMAGE_NAME, tag)
    }

    /// Parse an image reference in the `repository[:tag][@digest]` format.
    pub fn parse(reference: &str) -> Result<Self, Error> {
        let reference = reference.trim();
        let captures = REFERENCE.captures(reference).ok_or_else(|| {
            Error::Configuration(format!("`{}` is not a valid image reference", reference))
        })?;
        let repository = captures
            .name("repository")
            .map(|m| m.as_str())
            .unwrap_or_default();
        let tag = captures.name("tag").map(|m| m.as_str()).unwrap_or(DEFAULT_TAG);
        let image = Self::new(repository, tag)?;
        match captures.name("digest") {
            Some(digest) => Ok(image.with_digest(digest.as_str())),
            None => Ok(image),
        }
    }

    /// Pin the image to a content digest, e.g. `sha256:4f1c...`.
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// Expose an additional container port (e.g. `8443` when WireMock runs with HTTPS enabled).
    pub fn with_exposed_port(mut self, port: u16) -> Self {
        self.exposed_ports.insert(port);
        self
    }

    /// Replace the set of exposed ports.
    pub fn with_exposed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.exposed_ports = ports.into_iter().collect();
        self
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn exposed_ports(&self) -> &BTreeSet<u16> {
        &self.exposed_ports
    }

    /// The reference passed to the container runtime, e.g. `wiremock/wiremock:3.3.1`.
    pub fn reference(&self) -> String {
        match &self.digest {
            Some(digest) => format!("{}:{}@{}", self.repository, self.tag, digest),
            None => format!("{}:{}", self.repository, self.tag),
        }
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference())
    }
}

/// Numeric tags of the official image must be recent enough for our path and CLI conventions.
/// Anything else (`latest`, `nightly`, `3x-alpine`...) is taken at face value.
fn check_official_version(tag: &str) -> Result<(), Error> {
    let Some(captures) = VERSION.captures(tag) else {
        return Ok(());
    };
    let component = |name: &str| {
        captures
            .name(name)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    let version = (component("major"), component("minor"), component("patch"));
    if version < MINIMUM_SUPPORTED_VERSION {
        let (major, minor, patch) = MINIMUM_SUPPORTED_VERSION;
        return Err(Error::Configuration(format!(
            "For the official image, the WireMock version must be >= {}.{}.{}, got `{}`",
            major, minor, patch, tag
        )));
    }
    Ok(())
}
