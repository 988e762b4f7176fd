//! Cell value trait for raster bands

use num_traits::NumCast;
use std::fmt::Debug;

/// Trait for types that can be stored in a raster band.
///
/// Sensor bands usually arrive as unsigned digital numbers (`u8`, `u16`) or
/// as reflectance floats; every element must convert losslessly enough to
/// `f64` to feed the covariance sums.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Send + Sync + 'static
{
    /// Check if this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }
}

macro_rules! impl_raster_element_int {
    ($($t:ty),*) => {
        $(
            impl RasterElement for $t {
                fn is_nodata(&self, nodata: Option<Self>) -> bool {
                    nodata.map_or(false, |nd| *self == nd)
                }
            }
        )*
    };
}

macro_rules! impl_raster_element_float {
    ($($t:ty),*) => {
        $(
            impl RasterElement for $t {
                fn is_nodata(&self, nodata: Option<Self>) -> bool {
                    if !self.is_finite() {
                        return true;
                    }
                    match nodata {
                        Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                        None => false,
                    }
                }
            }
        )*
    };
}

impl_raster_element_int!(i16, i32, u8, u16, u32);
impl_raster_element_float!(f32, f64);
