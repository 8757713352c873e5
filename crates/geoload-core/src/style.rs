//! Map style document for the vector tile server.

use serde_json::{Value, json};

pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:9090";
pub const DEFAULT_MAP_NAME: &str = "base";
pub const DEFAULT_LAYER_NAME: &str = "hex5km";

const OSM_TILES: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Where the tile server publishes the map and which layer to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleConfig {
    pub public_url: String,
    pub map_name: String,
    pub layer_name: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            map_name: DEFAULT_MAP_NAME.to_string(),
            layer_name: DEFAULT_LAYER_NAME.to_string(),
        }
    }
}

impl StyleConfig {
    #[must_use]
    pub fn new(public_url: &str, map_name: &str, layer_name: &str) -> Self {
        Self {
            public_url: public_url.trim_end_matches('/').to_string(),
            map_name: map_name.to_string(),
            layer_name: layer_name.to_string(),
        }
    }

    /// Vector tile URL template of the map.
    #[must_use]
    pub fn tile_url(&self) -> String {
        format!("{}/maps/{}/{{z}}/{{x}}/{{y}}.pbf", self.public_url, self.map_name)
    }

    /// Style v8 document: OSM raster base with the layer outlined on top.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "version": 8,
            "sources": {
                "osm": {
                    "type": "raster",
                    "tiles": [OSM_TILES],
                    "tileSize": 256,
                    "attribution": "© OpenStreetMap contributors"
                },
                "tegola": {
                    "type": "vector",
                    "tiles": [self.tile_url()],
                    "minzoom": 0,
                    "maxzoom": 14
                }
            },
            "layers": [
                { "id": "osm-base", "type": "raster", "source": "osm" },
                {
                    "id": format!("{}-line", self.layer_name),
                    "type": "line",
                    "source": "tegola",
                    "source-layer": self.layer_name,
                    "paint": { "line-width": 1, "line-opacity": 0.7 }
                }
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_style() {
        let style = StyleConfig::default().to_json();
        assert_eq!(style["version"], 8);
        assert_eq!(
            style["sources"]["tegola"]["tiles"][0],
            "http://localhost:9090/maps/base/{z}/{x}/{y}.pbf"
        );
        assert_eq!(style["sources"]["tegola"]["maxzoom"], 14);
        assert_eq!(style["layers"][1]["id"], "hex5km-line");
        assert_eq!(style["layers"][1]["source-layer"], "hex5km");
    }

    #[test]
    fn test_custom_settings() {
        let style = StyleConfig::new("https://tiles.example.org/", "ide", "comunas").to_json();
        assert_eq!(
            style["sources"]["tegola"]["tiles"][0],
            "https://tiles.example.org/maps/ide/{z}/{x}/{y}.pbf"
        );
        assert_eq!(style["layers"][1]["id"], "comunas-line");
        let keys: Vec<&String> = style.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["version", "sources", "layers"]);
    }
}
