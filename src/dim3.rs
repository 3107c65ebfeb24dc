//! 3-D coordinates (mirrors CUDA's dim3).
//! Used for grid and block sizes and for the enumeration cursors that walk them.
//! Every walk is row-major: x varies fastest, then y, then z.

use serde::{Deserialize, Serialize};

/// An unsigned (x, y, z) triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const ZERO: Dim3 = Dim3 { x: 0, y: 0, z: 0 };

    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    /// Convenience constructor for 1D configs
    pub fn x(x: u32) -> Self {
        Dim3 { x, y: 1, z: 1 }
    }

    /// Number of points in the box spanned by this triple.
    pub fn size(&self) -> u64 {
        u64::from(self.x) * u64::from(self.y) * u64::from(self.z)
    }

    /// Step this cursor one position in row-major order inside `bound`.
    ///
    /// Increment x; when x reaches its bound it wraps to 0 and y is
    /// incremented; when y reaches its bound it wraps to 0 and z is
    /// incremented. z is never wrapped, so walking off the end of the box
    /// leaves `z == bound.z`.
    pub fn advance_within(&mut self, bound: Dim3) {
        self.x += 1;
        if self.x >= bound.x {
            self.x = 0;
            self.y += 1;
            if self.y >= bound.y {
                self.y = 0;
                self.z += 1;
            }
        }
    }

    /// True when every axis is strictly below its bound.
    pub fn is_within(&self, bound: Dim3) -> bool {
        self.x < bound.x && self.y < bound.y && self.z < bound.z
    }

    /// True when any axis has reached or passed its bound.
    pub fn any_at_or_beyond(&self, bound: Dim3) -> bool {
        self.x >= bound.x || self.y >= bound.y || self.z >= bound.z
    }

    /// Flat row-major index of this coordinate inside `bound`:
    /// x + bound.x * y + bound.x * bound.y * z
    ///
    /// Wraps on overflow like unsigned 32-bit arithmetic.
    pub fn linearize(&self, bound: Dim3) -> u32 {
        let plane = bound.x.wrapping_mul(bound.y);
        self.x
            .wrapping_add(bound.x.wrapping_mul(self.y))
            .wrapping_add(plane.wrapping_mul(self.z))
    }

    /// Inverse of [`Dim3::linearize`] for in-bounds flat ids.
    ///
    /// Panics if `bound` has a zero x or y extent.
    pub fn from_linear(flat: u32, bound: Dim3) -> Self {
        assert!(
            bound.x != 0 && bound.y != 0,
            "cannot delinearize inside zero-extent bound {bound}"
        );
        let x = flat % bound.x;
        let y = (flat / bound.x) % bound.y;
        let z = flat / (bound.x * bound.y);
        Dim3::new(x, y, z)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Dim3 { x, y, z }
    }
}

impl std::fmt::Display for Dim3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}
