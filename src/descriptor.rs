//! Convolution layer descriptors.
//!
//! # Descriptor Format
//!
//! A descriptor is a JSON object holding everything needed to build a
//! [`Conv2d`]:
//!
//! ```text
//! {
//!   "iWidth": 3, "iHeight": 3, "iDepth": 1,
//!   "kernelSize": 2, "oDepth": 1,
//!   "weight": [1.0, 0.0, 0.0, 1.0],   // oDepth * iDepth * kernelSize² values
//!   "offset": [0.0]                   // oDepth values (the bias)
//! }
//! ```
//!
//! Loading never truncates or pads: every size is checked against the shape
//! fields before a layer is built, and a mismatch comes back as a
//! [`ConfigError`].
//!
//! # Example
//!
//! ```rust
//! use briny_conv::descriptor::ConvDescriptor;
//!
//! let json = r#"{"iWidth":3,"iHeight":3,"iDepth":1,"kernelSize":2,"oDepth":1,
//!                "weight":[1,0,0,1],"offset":[0]}"#;
//! let conv = ConvDescriptor::from_json_str(json).unwrap().build().unwrap();
//! assert_eq!(conv.params().output_depth(), 1);
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layer::{Conv2d, ConvParams};
use crate::volume::Shape;

/// Serialized form of a convolution layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConvDescriptor {
    /// Input width.
    pub i_width: usize,
    /// Input height.
    pub i_height: usize,
    /// Input depth.
    pub i_depth: usize,
    /// Kernel edge.
    pub kernel_size: usize,
    /// Output depth.
    pub o_depth: usize,
    /// Flat `[oDepth][iDepth][k][k]` weights.
    pub weight: Vec<f32>,
    /// One bias per output feature map.
    pub offset: Vec<f32>,
}

/// Lets a descriptor pass through `briny`'s `TrustedData` gate.
impl Validate for ConvDescriptor {
    fn validate(&self) -> Result<(), ValidationError> {
        self.check().map(|_| ()).map_err(|_| ValidationError)
    }
}

impl ConvDescriptor {
    /// Parses a descriptor from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed JSON, missing or unknown fields.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parses a descriptor from a reader.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] on malformed input.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Loads a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be opened and
    /// [`ConfigError::Json`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "loading convolution descriptor");
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Serializes the descriptor as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] if serialization fails.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the descriptor to a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Json`] if writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let mut file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;
        Ok(())
    }

    /// Checks every size against the shape fields.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found: invalid shape, kernel too
    /// large, weight length or bias length mismatch.
    pub fn check(&self) -> Result<ConvParams, ConfigError> {
        let params = ConvParams::new(
            Shape::new(self.i_width, self.i_height, self.i_depth),
            self.kernel_size,
            self.o_depth,
        )?;

        if self.weight.len() != params.weight_len() {
            return Err(ConfigError::WeightLength {
                expected: params.weight_len(),
                actual: self.weight.len(),
            });
        }
        if self.offset.len() != self.o_depth {
            return Err(ConfigError::BiasLength {
                expected: self.o_depth,
                actual: self.offset.len(),
            });
        }

        Ok(params)
    }

    /// Builds the layer this descriptor describes.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] from [`check`](Self::check).
    pub fn build(self) -> Result<Conv2d, ConfigError> {
        let params = self.check()?;
        Conv2d::new(params, self.weight, self.offset)
    }
}

impl From<&Conv2d> for ConvDescriptor {
    fn from(conv: &Conv2d) -> Self {
        let params = conv.params();
        let input = params.input();
        Self {
            i_width: input.width,
            i_height: input.height,
            i_depth: input.depth,
            kernel_size: params.kernel_size(),
            o_depth: params.output_depth(),
            weight: conv.weight().to_vec(),
            offset: conv.bias().to_vec(),
        }
    }
}
