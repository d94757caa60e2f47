//! PNG image loader plugin.
//!
//! Publishes an `ImageLoader` interface and an entry in the image codec category.

use modloader::plugins::{PluginContext, PluginDescriptor, PluginId};
use modloader::registry::{CategoryId, InterfaceId, InterfaceTypeEntry, TypeInfo};
use std::sync::Arc;

pub const PLUGIN_ID: PluginId = PluginId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0000_0001);
pub const IMAGE_LOADER: InterfaceId = InterfaceId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0001_0000);
pub const IMAGE_CODECS: CategoryId = CategoryId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0002_0000);

/// Decodes PNG signatures
pub struct PngLoader;

impl PngLoader {
    pub fn can_load(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(b"\x89PNG\r\n\x1a\n")
    }
}

fn create() -> PluginDescriptor {
    PluginDescriptor::new(PLUGIN_ID, "ImgPng")
        .with_version(env!("CARGO_PKG_VERSION"))
        .on_register(|registrar| {
            registrar.register_interface_type(
                InterfaceTypeEntry::singleton(IMAGE_LOADER, Arc::new(PngLoader))
                    .with_factory(|| Box::new(PngLoader)),
            );
            let codec = Arc::new(TypeInfo::new("png", vec!["png".to_string()]));
            registrar.register_type_info(IMAGE_CODECS, Arc::clone(&codec));
            Ok(PluginContext::new(codec))
        })
        .on_unregister(|registrar, context| {
            if let Ok(codec) = context.downcast::<Arc<TypeInfo>>() {
                registrar.unregister_type_info(IMAGE_CODECS, &codec);
            }
            registrar.unregister_interface_type(IMAGE_LOADER);
        })
}

modloader::export_plugin!(create);
