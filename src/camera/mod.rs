pub use crate::error::Error;
pub use burn::config::Config;

/// A camera view participating in training.
///
/// Loading images and poses is the dataset layer's concern. Workload division
/// only needs the identity and the image dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Camera {
    pub camera_id: u32,
    pub image_height: u32,
    pub image_width: u32,
}

#[derive(Config, Copy, Debug, PartialEq)]
pub struct TileGridOptions {
    /// It should match the rasterizer's block height.
    #[config(default = "16")]
    pub tile_height: u32,

    /// It should match the rasterizer's block width.
    #[config(default = "16")]
    pub tile_width: u32,
}

/// The screen-space tile grid of one camera, in row-major tile ordering.
/// Immutable once derived.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileGrid {
    pub image_height: u32,
    pub image_width: u32,
    pub tile_count_x: u32,
    pub tile_count_y: u32,
    pub tile_height: u32,
    pub tile_width: u32,
}

impl TileGridOptions {
    pub fn check(&self) -> Result<&Self, Error> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(Error::InvalidTileSize(self.tile_width, self.tile_height));
        }
        Ok(self)
    }

    pub fn grid(
        &self,
        camera: &Camera,
    ) -> TileGrid {
        TileGrid {
            image_height: camera.image_height,
            image_width: camera.image_width,
            tile_count_x: camera.image_width.div_ceil(self.tile_width),
            tile_count_y: camera.image_height.div_ceil(self.tile_height),
            tile_height: self.tile_height,
            tile_width: self.tile_width,
        }
    }
}

impl TileGrid {
    #[inline]
    pub fn tile_count(&self) -> u64 {
        self.tile_count_x as u64 * self.tile_count_y as u64
    }
}

impl Default for TileGridOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn grid() {
        use super::*;

        let camera = Camera {
            camera_id: 3,
            image_height: 100,
            image_width: 170,
        };
        let grid = TileGridOptions::default().grid(&camera);

        assert_eq!(grid.tile_count_x, 11);
        assert_eq!(grid.tile_count_y, 7);
        assert_eq!(grid.tile_count(), 77);
    }

    #[test]
    fn check() {
        use super::*;

        TileGridOptions::default().check().unwrap();
        TileGridOptions::new().with_tile_width(0).check().unwrap_err();
        TileGridOptions::new().with_tile_height(0).check().unwrap_err();
    }
}
