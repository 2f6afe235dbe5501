use axum::Json;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Closed set of processing tools. Everything downstream dispatches on this
/// enum; unrecognised identifiers are rejected at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    AutoEnhance,
    BackgroundRemoval,
    FaceRetouch,
    ObjectEraser,
    SkyReplacement,
    SuperResolution,
    StyleTransfer,
}

impl ToolId {
    pub const ALL: [ToolId; 7] = [
        ToolId::AutoEnhance,
        ToolId::BackgroundRemoval,
        ToolId::FaceRetouch,
        ToolId::ObjectEraser,
        ToolId::SkyReplacement,
        ToolId::SuperResolution,
        ToolId::StyleTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolId::AutoEnhance => "auto_enhance",
            ToolId::BackgroundRemoval => "background_removal",
            ToolId::FaceRetouch => "face_retouch",
            ToolId::ObjectEraser => "object_eraser",
            ToolId::SkyReplacement => "sky_replacement",
            ToolId::SuperResolution => "super_resolution",
            ToolId::StyleTransfer => "style_transfer",
        }
    }

    pub fn parse(raw: &str) -> Option<ToolId> {
        Self::ALL.iter().copied().find(|tool| tool.as_str() == raw)
    }

    /// Face restoration tools. The hosted backends only serve these.
    pub fn is_face_tool(&self) -> bool {
        matches!(self, ToolId::AutoEnhance | ToolId::FaceRetouch)
    }
}

#[derive(Serialize, Clone)]
pub struct ToolInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub endpoint: &'static str,
    pub description: &'static str,
}

static TOOLS: Lazy<Vec<ToolInfo>> = Lazy::new(|| {
    vec![
        ToolInfo {
            id: "auto_enhance",
            name: "Auto Enhance",
            endpoint: "/enhance",
            description: "Contrast + sharpness boost",
        },
        ToolInfo {
            id: "background_removal",
            name: "Background Removal",
            endpoint: "/remove_bg",
            description: "Make near-white pixels transparent",
        },
        ToolInfo {
            id: "face_retouch",
            name: "Face Retouch",
            endpoint: "/face_retouch",
            description: "Light smoothing filter",
        },
        ToolInfo {
            id: "object_eraser",
            name: "Object Eraser",
            endpoint: "/erase_object",
            description: "Stub for inpainting",
        },
        ToolInfo {
            id: "sky_replacement",
            name: "Sky Replacement",
            endpoint: "/sky_replace",
            description: "Blue channel tint",
        },
        ToolInfo {
            id: "super_resolution",
            name: "Super Resolution",
            endpoint: "/super_res",
            description: "Upscale 2x Lanczos",
        },
        ToolInfo {
            id: "style_transfer",
            name: "Artistic Style Transfer",
            endpoint: "/style_transfer",
            description: "Edge enhance filter",
        },
    ]
});

#[derive(Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolInfo>,
}

pub async fn list_tools() -> Json<ToolsResponse> {
    Json(ToolsResponse { tools: TOOLS.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_ids_round_trip() {
        for tool in ToolId::ALL {
            assert_eq!(ToolId::parse(tool.as_str()), Some(tool));
        }
        assert_eq!(ToolId::parse("beautify"), None);
    }

    #[test]
    fn serde_names_match_catalog_ids() {
        for (tool, info) in ToolId::ALL.iter().zip(TOOLS.iter()) {
            let encoded = serde_json::to_value(tool).unwrap();
            assert_eq!(encoded, serde_json::Value::String(info.id.to_string()));
        }
    }

    #[test]
    fn only_face_tools_flagged() {
        let faces: Vec<_> = ToolId::ALL.iter().filter(|t| t.is_face_tool()).collect();
        assert_eq!(faces, [&ToolId::AutoEnhance, &ToolId::FaceRetouch]);
    }
}
