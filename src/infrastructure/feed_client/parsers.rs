//! Payload parsers for the catalog feed
//!
//! Parsers never drop a record for lacking an id: they hand it on with the field absent so the
//! key resolver can reject and count it.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::entities::ColorType;
use crate::domain::keys::{
    RawBrand, RawPanoramaColor, RawPanoramaFrame, RawParamTitle, RawParamValue, RawPhoto,
    RawPhotoCategory, RawPhotoColor, RawSeries, RawSpecification,
};
use crate::infrastructure::feed_client::PhotoListing;

/// Reads an integer that may be encoded as a number or a numeric string.
#[must_use]
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[must_use]
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[must_use]
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

static NULL: Value = Value::Null;

fn field<'a>(item: &'a Value, name: &str) -> &'a Value {
    item.get(name).unwrap_or(&NULL)
}

fn items<'a>(item: &'a Value, name: &str) -> &'a [Value] {
    item.get(name)
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice)
}

fn result(payload: &Value) -> &Value {
    field(payload, "result")
}

/// Brands in tree order, each with its series.
pub type TreeMenu = Vec<(RawBrand, Vec<RawSeries>)>;

/// `result[].branditems[].fctitems[].seriesitems[]`
#[must_use]
pub fn parse_tree_menu(payload: &Value) -> TreeMenu {
    let mut brands = Vec::new();
    for letter_group in result(payload).as_array().map_or(&[][..], Vec::as_slice) {
        for brand in items(letter_group, "branditems") {
            let raw = RawBrand {
                id: as_i64(field(brand, "id")),
                name: as_string(field(brand, "name")),
                logo_url: as_string(field(brand, "logo")),
            };
            // series of a brand without an id cannot be attached to anything
            let series = raw.id.map_or_else(Vec::new, |brand_id| {
                items(brand, "fctitems")
                    .iter()
                    .flat_map(|factory| items(factory, "seriesitems"))
                    .map(|series| RawSeries {
                        brand_id,
                        id: as_i64(field(series, "id")),
                        name: as_string(field(series, "name")),
                        is_new_energy: as_bool(field(series, "isnewenergy")),
                    })
                    .collect()
            });
            brands.push((raw, series));
        }
    }
    brands
}

/// Everything one series' parameter configuration carries.
#[derive(Debug, Clone, Default)]
pub struct ParamConf {
    pub specifications: Vec<RawSpecification>,
    pub titles: Vec<RawParamTitle>,
    pub values: HashMap<i64, Vec<RawParamValue>>,
}

/// `result.titlelist[].items[]` and `result.datalist[].paramconflist[]`
#[must_use]
pub fn parse_param_conf(payload: &Value, series_id: i64) -> ParamConf {
    let result = result(payload);
    let mut conf = ParamConf::default();
    let mut names_by_title: HashMap<i64, String> = HashMap::new();

    for group in items(result, "titlelist") {
        let group_name = as_string(field(group, "groupname"));
        let item_type = as_string(field(group, "itemtype"));
        for item in items(group, "items") {
            let title_id = as_i64(field(item, "titleid"));
            let item_name = as_string(field(item, "itemname")).unwrap_or_default();
            if let Some(id) = title_id {
                // a title id is unique inside a series; the first occurrence wins
                if names_by_title.contains_key(&id) {
                    continue;
                }
                names_by_title.insert(id, item_name.clone());
            }
            conf.titles.push(RawParamTitle {
                series_id,
                title_id,
                item_name: Some(item_name),
                group_name: group_name.clone(),
                item_type: item_type.clone(),
            });
        }
    }

    for spec in items(result, "datalist") {
        let spec_id = as_i64(field(spec, "specid"));
        conf.specifications.push(RawSpecification {
            series_id,
            id: spec_id,
            name: as_string(field(spec, "specname")),
            min_price: as_string(field(spec, "minprice")),
        });
        let Some(spec_id) = spec_id else { continue };

        let mut values = Vec::new();
        for param in items(spec, "paramconflist") {
            let title_id = as_i64(field(param, "titleid"));
            let item_name = title_id.and_then(|id| names_by_title.get(&id).cloned());
            let sublist = items(param, "sublist");

            if sublist.is_empty() {
                // without a sublist the value travels in the entry's own itemname
                values.push(RawParamValue {
                    series_id,
                    spec_id,
                    title_id,
                    item_name,
                    sub_name: None,
                    value: as_string(field(param, "itemname")),
                });
            } else {
                for sub in sublist {
                    values.push(RawParamValue {
                        series_id,
                        spec_id,
                        title_id,
                        item_name: item_name.clone(),
                        sub_name: as_string(field(sub, "name")),
                        value: as_string(field(sub, "value")),
                    });
                }
            }
        }
        conf.values.insert(spec_id, values);
    }

    conf
}

/// Series palette and picture categories.
#[derive(Debug, Clone, Default)]
pub struct PhotoInfo {
    pub colors: Vec<RawPhotoColor>,
    pub categories: Vec<RawPhotoCategory>,
}

/// `result.exteriorcolor[]`, `result.interiorcolor[]` and `result.pictypelist[]`
#[must_use]
pub fn parse_photo_info(payload: &Value, series_id: i64) -> PhotoInfo {
    let result = result(payload);
    let mut info = PhotoInfo::default();

    for (list, color_type) in [
        ("exteriorcolor", ColorType::Exterior),
        ("interiorcolor", ColorType::Interior),
    ] {
        for color in items(result, list) {
            info.colors.push(RawPhotoColor {
                series_id,
                color_type,
                id: as_i64(field(color, "id")),
                name: as_string(field(color, "name")),
                value: as_string(field(color, "value")),
                is_on_sale: as_bool(field(color, "isonsale")),
            });
        }
    }

    for category in items(result, "pictypelist") {
        info.categories.push(RawPhotoCategory {
            series_id,
            id: as_i64(field(category, "id")),
            name: as_string(field(category, "name")),
        });
    }

    info
}

/// `result.piclist[]`. A picture without its own color or spec inherits the listing's.
#[must_use]
pub fn parse_pic_list(payload: &Value, listing: &PhotoListing) -> Vec<RawPhoto> {
    items(result(payload), "piclist")
        .iter()
        .map(|pic| {
            let color_id = as_i64(field(pic, "colorid"))
                .filter(|&c| c != 0)
                .unwrap_or(listing.color_id);
            let spec_id = as_i64(field(pic, "specid"))
                .filter(|&s| s != 0)
                .unwrap_or(listing.spec_id);
            RawPhoto {
                series_id: listing.series_id,
                spec_id,
                category_id: listing.category_id,
                color_id: Some(color_id),
                id: as_string(field(pic, "id")),
                remote_url: as_string(field(pic, "originalpic")),
                spec_name: as_string(field(pic, "specname")),
            }
        })
        .collect()
}

/// Panorama base information for one specification.
#[derive(Debug, Clone, Default)]
pub struct PanoramaInfo {
    pub ext_id: Option<i64>,
    /// Specification the payload claims to describe
    pub ext_spec_id: Option<i64>,
    pub image_root: String,
    pub colors: Vec<RawPanoramaColor>,
    /// Frames embedded in the payload, by panorama color id
    pub frames: HashMap<i64, Vec<RawPanoramaFrame>>,
}

/// `ext`, `image_root` and `color_info[]` with optional `Hori.Normal[]` frames.
#[must_use]
pub fn parse_pano_baseinfo(payload: &Value, spec_id: i64, default_image_root: &str) -> PanoramaInfo {
    let ext = field(payload, "ext");
    let ext_id = as_i64(field(ext, "Id"));
    let image_root =
        as_string(field(payload, "image_root")).unwrap_or_else(|| default_image_root.to_string());

    let mut info = PanoramaInfo {
        ext_id,
        ext_spec_id: as_i64(field(ext, "SpecId")),
        image_root,
        ..PanoramaInfo::default()
    };

    for color in items(payload, "color_info") {
        let color_id = as_i64(field(color, "ColorId"));
        info.colors.push(RawPanoramaColor {
            spec_id,
            id: as_i64(field(color, "Id")),
            ext_id,
            base_color_name: as_string(field(color, "BaseColorName")),
            color_name: as_string(field(color, "ColorName")),
            color_value: as_string(field(color, "ColorValue")),
            color_id,
        });

        let Some(color_id) = color_id else { continue };
        let frames: Vec<RawPanoramaFrame> = items(field(color, "Hori"), "Normal")
            .iter()
            .map(|frame| RawPanoramaFrame {
                spec_id,
                color_id,
                seq: as_i64(field(frame, "Seq")),
                remote_url: as_string(field(frame, "Url"))
                    .map(|url| normalize_frame_url(&url, &info.image_root)),
            })
            .collect();
        if !frames.is_empty() {
            info.frames.insert(color_id, frames);
        }
    }

    info
}

/// `result.l1[]` of the per-color frame listing.
#[must_use]
pub fn parse_vr_info(
    payload: &Value,
    spec_id: i64,
    color_id: i64,
    image_root: &str,
) -> Vec<RawPanoramaFrame> {
    items(result(payload), "l1")
        .iter()
        .map(|frame| RawPanoramaFrame {
            spec_id,
            color_id,
            seq: as_i64(field(frame, "seq")),
            remote_url: as_string(field(frame, "url")).map(|url| normalize_frame_url(&url, image_root)),
        })
        .collect()
}

/// Makes a frame URL absolute against the payload's protocol-relative image root.
#[must_use]
pub fn normalize_frame_url(url: &str, image_root: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    if url.starts_with("//") {
        return format!("https:{url}");
    }

    let root = image_root.trim_end_matches('/');
    let root = if root.starts_with("//") {
        format!("https:{root}")
    } else {
        root.to_string()
    };
    format!("{}/{}", root, url.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tree_menu_keeps_brands_without_ids() {
        let payload = json!({
            "result": [{
                "letter": "A",
                "branditems": [
                    {"id": 33, "name": "奥迪", "logo": "//img/audi.png", "fctitems": [
                        {"seriesitems": [
                            {"id": 3895, "name": "奥迪A6L", "isnewenergy": 0},
                            {"name": "no id"}
                        ]}
                    ]},
                    {"name": "nameless"}
                ]
            }]
        });
        let tree = parse_tree_menu(&payload);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].0.id, Some(33));
        assert_eq!(tree[0].1.len(), 2);
        assert_eq!(tree[0].1[0].is_new_energy, Some(false));
        assert_eq!(tree[0].1[1].id, None);
        assert_eq!(tree[1].0.id, None);
        assert!(tree[1].1.is_empty());
    }

    #[test]
    fn test_param_conf_uses_titles_for_item_names() {
        let payload = json!({
            "result": {
                "titlelist": [{
                    "groupname": "发动机",
                    "itemtype": "基本参数",
                    "items": [
                        {"titleid": 7, "itemname": "排量(L)"},
                        {"titleid": 7, "itemname": "duplicate"},
                        {"titleid": 9, "itemname": "座椅"}
                    ]
                }],
                "datalist": [{
                    "specid": 51234,
                    "specname": "2024款 40 TFSI",
                    "minprice": "39.98万",
                    "paramconflist": [
                        {"titleid": 7, "itemname": "2.0"},
                        {"titleid": 9, "sublist": [
                            {"name": "前排", "value": "●"},
                            {"name": "", "value": ""}
                        ]},
                        {"titleid": 404, "itemname": "orphan"},
                        {"itemname": "no title"}
                    ]
                }, {"specname": "no id"}]
            }
        });
        let conf = parse_param_conf(&payload, 3895);

        assert_eq!(conf.titles.len(), 2);
        assert_eq!(conf.specifications.len(), 2);
        assert_eq!(conf.specifications[1].id, None);

        let values = &conf.values[&51234];
        assert_eq!(values.len(), 5);
        assert_eq!(values[0].item_name.as_deref(), Some("排量(L)"));
        assert_eq!(values[0].value.as_deref(), Some("2.0"));
        assert_eq!(values[1].sub_name.as_deref(), Some("前排"));
        assert_eq!(values[2].value.as_deref(), Some(""));
        assert_eq!(values[3].item_name, None);
        assert_eq!(values[4].title_id, None);
    }

    #[test]
    fn test_pic_list_inherits_listing_color_and_spec() {
        let listing = PhotoListing {
            series_id: 3895,
            spec_id: 51234,
            category_id: 1,
            color_id: 12,
            is_interior: false,
            page_size: 60,
        };
        let payload = json!({"result": {"pagecount": 1, "piclist": [
            {"id": 11353340, "colorid": 0, "originalpic": "https://img/a.jpg"},
            {"id": "11353341", "colorid": 14, "specid": 50000, "originalpic": "https://img/b.jpg"},
            {"colorid": 12}
        ]}});
        let photos = parse_pic_list(&payload, &listing);

        assert_eq!(photos.len(), 3);
        assert_eq!(photos[0].id.as_deref(), Some("11353340"));
        assert_eq!(photos[0].color_id, Some(12));
        assert_eq!(photos[0].spec_id, 51234);
        assert_eq!(photos[1].color_id, Some(14));
        assert_eq!(photos[1].spec_id, 50000);
        assert_eq!(photos[2].id, None);
    }

    #[test]
    fn test_pano_baseinfo_colors_and_frames() {
        let payload = json!({
            "ext": {"Id": 5632, "SpecId": 51234},
            "color_info": [{
                "Id": 901, "ColorId": 12, "ColorName": "冰川白", "BaseColorName": "白色",
                "ColorValue": "#FFFFFF",
                "Hori": {"Normal": [
                    {"Seq": 0, "Url": "g33/M02/5D/F9/frame_0.png"},
                    {"Seq": 1, "Url": "/g33/M02/5D/F9/frame_1.png"}
                ]}
            }, {"Id": 902, "ColorName": "no color id"}]
        });
        let info = parse_pano_baseinfo(&payload, 51234, "//panovr.autoimg.cn/pano");

        assert_eq!(info.ext_id, Some(5632));
        assert_eq!(info.ext_spec_id, Some(51234));
        assert_eq!(info.colors.len(), 2);
        assert_eq!(info.colors[1].color_id, None);
        let frames = &info.frames[&12];
        assert_eq!(
            frames[0].remote_url.as_deref(),
            Some("https://panovr.autoimg.cn/pano/g33/M02/5D/F9/frame_0.png")
        );
        assert_eq!(
            frames[1].remote_url.as_deref(),
            Some("https://panovr.autoimg.cn/pano/g33/M02/5D/F9/frame_1.png")
        );
    }

    #[test]
    fn test_frame_url_normalization() {
        let root = "//panovr.autoimg.cn/pano";
        assert_eq!(normalize_frame_url("https://a/b.png", root), "https://a/b.png");
        assert_eq!(normalize_frame_url("//cdn/b.png", root), "https://cdn/b.png");
        assert_eq!(
            normalize_frame_url("b.png", "https://root/"),
            "https://root/b.png"
        );
    }

    #[test]
    fn test_vr_info_frames() {
        let payload = json!({"result": {"l1": [
            {"seq": 0, "url": "https://pano/0.jpg"},
            {"url": "https://pano/x.jpg"}
        ]}});
        let frames = parse_vr_info(&payload, 1, 2, "//root");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].seq, Some(0));
        assert_eq!(frames[1].seq, None);
    }

    #[test]
    fn test_loose_scalars() {
        assert_eq!(as_i64(&json!("42")), Some(42));
        assert_eq!(as_i64(&json!(42.0)), Some(42));
        assert_eq!(as_i64(&json!(null)), None);
        assert_eq!(as_bool(&json!(1)), Some(true));
        assert_eq!(as_string(&json!(7)), Some("7".to_string()));
    }
}
