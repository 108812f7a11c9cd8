//! Request and response types at the recommendation boundary.
//!
//! The wire shapes (`RecommendRequest`, `RecommendResponse`) mirror the JSON
//! the upload front end exchanges with the service. They are resolved once
//! into a [`Query`] so nothing downstream handles optional coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::grid::{FocusRect, ImageShape};
use crate::error::{RecommendError, Result};

/// Opaque catalog image identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an image the embedding model can load (path or URI)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(reference: impl Into<String>) -> Result<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(RecommendError::InvalidInput(
                "image reference must not be empty".into(),
            ));
        }
        Ok(Self(reference))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rectangle drawn on some display surface, together with that surface's size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FocusRegion {
    pub rect: FocusRect,
    pub surface: ImageShape,
}

impl FocusRegion {
    /// Validate and build a focus region.
    ///
    /// Coordinates may lie outside the surface; such rectangles map to no
    /// grid cell and the query falls back to whole-image ranking.
    pub fn new(rect: FocusRect, surface: ImageShape) -> Result<Self> {
        let coords = [rect.x1, rect.y1, rect.x2, rect.y2];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(RecommendError::InvalidInput(format!(
                "focus rectangle has non-finite coordinates: {:?}",
                rect
            )));
        }
        if rect.x1 > rect.x2 || rect.y1 > rect.y2 {
            return Err(RecommendError::InvalidInput(format!(
                "focus rectangle corners are inverted: {:?}",
                rect
            )));
        }
        if surface.height == 0 || surface.width == 0 {
            return Err(RecommendError::InvalidInput(format!(
                "focus surface must be non-empty, got {}x{}",
                surface.height, surface.width
            )));
        }
        Ok(Self { rect, surface })
    }
}

/// A resolved recommendation query.
#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    /// Rank by whole-image similarity
    WholeImage(ImageRef),
    /// Rank by the patches under a focus rectangle
    FocusedImage(ImageRef, FocusRegion),
}

impl Query {
    pub fn whole_image(image: impl Into<String>) -> Result<Self> {
        Ok(Query::WholeImage(ImageRef::new(image)?))
    }

    pub fn focused(image: impl Into<String>, region: FocusRegion) -> Result<Self> {
        Ok(Query::FocusedImage(ImageRef::new(image)?, region))
    }

    pub fn image(&self) -> &ImageRef {
        match self {
            Query::WholeImage(image) | Query::FocusedImage(image, _) => image,
        }
    }

    pub fn focus(&self) -> Option<&FocusRegion> {
        match self {
            Query::WholeImage(_) => None,
            Query::FocusedImage(_, region) => Some(region),
        }
    }
}

/// Focus rectangle as sent by the front end.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoordsInfo {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    /// Height of the surface the rectangle was drawn on
    pub height: f64,
    /// Width of the surface the rectangle was drawn on
    pub width: f64,
}

/// Recommendation request body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecommendRequest {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords_info: Option<CoordsInfo>,
}

/// Recommendation response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendResponse {
    /// Catalog identifiers, most similar first
    pub image_id: Vec<ImageId>,
}

impl TryFrom<RecommendRequest> for Query {
    type Error = RecommendError;

    fn try_from(request: RecommendRequest) -> Result<Self> {
        let image = ImageRef::new(request.image)?;
        let Some(coords) = request.coords_info else {
            return Ok(Query::WholeImage(image));
        };

        let surface = surface_from_coords(&coords)?;
        let rect = FocusRect::new(coords.x1, coords.y1, coords.x2, coords.y2);
        Ok(Query::FocusedImage(image, FocusRegion::new(rect, surface)?))
    }
}

fn surface_from_coords(coords: &CoordsInfo) -> Result<ImageShape> {
    let dim = |value: f64, name: &str| -> Result<usize> {
        if !value.is_finite() || value < 1.0 || value.fract() != 0.0 {
            return Err(RecommendError::InvalidInput(format!(
                "surface {} must be a positive integer, got {}",
                name, value
            )));
        }
        Ok(value as usize)
    };
    Ok(ImageShape::new(
        dim(coords.height, "height")?,
        dim(coords.width, "width")?,
    ))
}
