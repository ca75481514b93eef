//! Image metadata: descriptors and the resolver that builds them.

mod resolver;
mod types;

pub use resolver::{parse_metadata, resolve, MAX_RASTER_DIMENSION};
pub use types::{
    AcquisitionInfo, BandDescriptor, BandId, ColorInterpretation, GeoTransform,
    ImageDescriptor, RpcModel, SrsRef, IDENTITY_GEOTRANSFORM, MAIN_MASK_INTERPRETATION,
    RPC_COEFF_COUNT,
};

#[cfg(test)]
pub(crate) use resolver::tests::sample_properties;
#[cfg(test)]
pub(crate) use types::tests::{band, descriptor};
