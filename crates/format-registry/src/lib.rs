//! Static image-format descriptor table: signature sniffing plus the
//! extension/MIME metadata and the flags that steer quantization.

use common_types::PalettizeError;
use tracing::debug;

/// Immutable description of one supported image format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescriptor {
    name: &'static str,
    signatures: &'static [&'static [u8]],
    extensions: &'static [&'static str],
    mime_type: &'static str,
    is_indexed: bool,
    is_animated: bool,
}

impl FormatDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        self.extensions
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    /// Pixels are palette indices rather than direct color values.
    pub fn is_indexed(&self) -> bool {
        self.is_indexed
    }

    /// The format carries a frame sequence with per-frame timing.
    pub fn is_animated(&self) -> bool {
        self.is_animated
    }

    /// Whether encoding to this format needs the quantization core first.
    pub fn requires_quantization(&self) -> bool {
        self.is_indexed || self.is_animated
    }

    /// Match this descriptor's signatures against a file's leading bytes.
    pub fn matches(&self, leading: &[u8]) -> bool {
        self.signatures
            .iter()
            .any(|sig| leading.len() >= sig.len() && &leading[..sig.len()] == *sig)
    }

    fn validate(self) -> Result<Self, PalettizeError> {
        if self.signatures.is_empty() || self.signatures.iter().any(|s| s.is_empty()) {
            return Err(PalettizeError::RegistryInit {
                message: format!("format {} has an empty signature", self.name),
            });
        }
        if self.extensions.is_empty() {
            return Err(PalettizeError::RegistryInit {
                message: format!("format {} declares no extensions", self.name),
            });
        }
        if !self.mime_type.contains('/') {
            return Err(PalettizeError::RegistryInit {
                message: format!(
                    "format {} has malformed MIME type {:?}",
                    self.name, self.mime_type
                ),
            });
        }
        Ok(self)
    }
}

fn gif_descriptor() -> Result<FormatDescriptor, PalettizeError> {
    FormatDescriptor {
        name: "gif",
        signatures: &[b"GIF87a", b"GIF89a"],
        extensions: &["gif"],
        mime_type: "image/gif",
        is_indexed: true,
        is_animated: true,
    }
    .validate()
}

fn png_descriptor() -> Result<FormatDescriptor, PalettizeError> {
    FormatDescriptor {
        name: "png",
        signatures: &[&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]],
        extensions: &["png"],
        mime_type: "image/png",
        is_indexed: false,
        is_animated: false,
    }
    .validate()
}

fn jpeg_descriptor() -> Result<FormatDescriptor, PalettizeError> {
    FormatDescriptor {
        name: "jpeg",
        signatures: &[&[0xFF, 0xD8, 0xFF]],
        extensions: &["jpg", "jpeg", "jfif"],
        mime_type: "image/jpeg",
        is_indexed: false,
        is_animated: false,
    }
    .validate()
}

fn bmp_descriptor() -> Result<FormatDescriptor, PalettizeError> {
    FormatDescriptor {
        name: "bmp",
        signatures: &[b"BM"],
        extensions: &["bmp"],
        mime_type: "image/bmp",
        is_indexed: false,
        is_animated: false,
    }
    .validate()
}

fn tiff_descriptor() -> Result<FormatDescriptor, PalettizeError> {
    FormatDescriptor {
        name: "tiff",
        // Little-endian and big-endian byte-order marks.
        signatures: &[&[0x49, 0x49, 0x2A, 0x00], &[0x4D, 0x4D, 0x00, 0x2A]],
        extensions: &["tif", "tiff"],
        mime_type: "image/tiff",
        is_indexed: false,
        is_animated: false,
    }
    .validate()
}

/// The process-wide format table.
///
/// Built once at startup from an explicit list of descriptor constructors;
/// any constructor failing aborts the bootstrap, no partial registry is
/// produced. Read-only afterwards, so shared references are safe across
/// threads without synchronization.
#[derive(Debug)]
pub struct FormatRegistry {
    descriptors: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    /// Build the registry from the built-in descriptor set.
    pub fn bootstrap() -> Result<Self, PalettizeError> {
        let constructors: &[fn() -> Result<FormatDescriptor, PalettizeError>] = &[
            gif_descriptor,
            png_descriptor,
            jpeg_descriptor,
            bmp_descriptor,
            tiff_descriptor,
        ];

        let mut registry = Self {
            descriptors: Vec::with_capacity(constructors.len()),
        };
        for constructor in constructors {
            registry.register(constructor()?)?;
        }
        debug!(formats = registry.descriptors.len(), "format registry ready");
        Ok(registry)
    }

    fn register(&mut self, descriptor: FormatDescriptor) -> Result<(), PalettizeError> {
        if self.descriptors.iter().any(|d| d.name == descriptor.name) {
            return Err(PalettizeError::RegistryInit {
                message: format!("duplicate format descriptor {}", descriptor.name),
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Identify a format from a file's leading bytes.
    pub fn sniff(&self, leading: &[u8]) -> Option<&FormatDescriptor> {
        self.descriptors.iter().find(|d| d.matches(leading))
    }

    /// Look a format up by file extension, case-insensitively.
    pub fn by_extension(&self, extension: &str) -> Option<&FormatDescriptor> {
        let wanted = extension.trim_start_matches('.').to_ascii_lowercase();
        self.descriptors
            .iter()
            .find(|d| d.extensions.iter().any(|ext| *ext == wanted))
    }

    pub fn descriptors(&self) -> &[FormatDescriptor] {
        &self.descriptors
    }
}
