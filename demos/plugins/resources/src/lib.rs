//! Resource cache plugin; needs an image loader from `ImgPng`.

use anyhow::anyhow;
use modloader::plugins::{PluginContext, PluginDescriptor, PluginId};
use modloader::registry::{CategoryId, InterfaceId};

const PLUGIN_ID: PluginId = PluginId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0000_0002);
const IMG_PNG: PluginId = PluginId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0000_0001);
const IMAGE_LOADER: InterfaceId = InterfaceId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0001_0000);
const IMAGE_CODECS: CategoryId = CategoryId::from_u128(0x6f1c_0a6e_2d4b_4c1e_9a57_0000_0002_0000);

fn create() -> PluginDescriptor {
    PluginDescriptor::new(PLUGIN_ID, "Resources")
        .with_version(env!("CARGO_PKG_VERSION"))
        .depends_on(IMG_PNG)
        .on_register(|registrar| {
            // The concrete loader type lives in another library, so only presence is checked
            if registrar.lookup_interface(IMAGE_LOADER).is_none() {
                return Err(anyhow!("no image loader registered"));
            }
            let codecs: Vec<String> = registrar
                .query_type_info(IMAGE_CODECS)
                .iter()
                .map(|info| info.name().to_string())
                .collect();
            Ok(PluginContext::new(codecs))
        })
}

modloader::export_plugin!(create);
