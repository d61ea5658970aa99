//! Product-type capability lookups
//!
//! Avi-on assigns each hardware product a numeric product type. The hub only
//! cares about two capabilities - whether the light dims and whether it has a
//! tunable white channel - plus a human-readable model name for discovery
//! payloads. Unknown types are treated as plain dimmers, which is the safe
//! default for this product line.

/// Known product types with a tunable-white channel
const COLOR_TEMP_TYPES: &[u8] = &[134, 135, 147, 160, 162];

/// Known product types without dimming (plug-in switches, relays)
const SWITCH_ONLY_TYPES: &[u8] = &[93, 94];

/// Whether a product type supports brightness control
pub fn has_dimming(product_type: u8) -> bool {
    !SWITCH_ONLY_TYPES.contains(&product_type)
}

/// Whether a product type supports color-temperature control
pub fn has_color_temp(product_type: u8) -> bool {
    COLOR_TEMP_TYPES.contains(&product_type)
}

/// Display name for a product type
pub fn product_name(product_type: u8) -> &'static str {
    match product_type {
        63 => "Smart Dimmer",
        70 => "Wallbox Dimmer",
        93 => "Smart Switch",
        94 => "Plug-in Switch",
        134 => "Halo 4in Downlight",
        135 => "Halo 6in Downlight",
        147 => "A19 Smart Bulb",
        160 => "BR30 Smart Bulb",
        162 => "Edge-lit Panel",
        _ => "Avi-on Device",
    }
}
