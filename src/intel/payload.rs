//! Decoding of `getEntities` and `getPortalDetails` responses
//!
//! The intel map answers with positional JSON arrays. Everything is decoded
//! into explicit types here so the worker never indexes into raw JSON; any
//! row with an unexpected shape turns the whole tile into
//! [`TilePayload::Malformed`] instead of failing the request.

use serde_json::Value;
use std::collections::HashMap;

use crate::models::PortalDetail;
use crate::utils::error::{FetchError, PayloadError};

/// Type discriminator of portal entities
pub const PORTAL_TYPE: &str = "p";

/// Index of the image URL in a portal data array
const PORTAL_IMAGE_INDEX: usize = 7;

/// Index of the title in a portal data array
const PORTAL_NAME_INDEX: usize = 8;

/// Decoded payload of one tile
#[derive(Debug, Clone, PartialEq)]
pub enum TilePayload {
    /// The tile carries an explicit error marker (e.g. `TIMEOUT`)
    Error(String),

    /// The tile's entity list; may be empty
    Entities(Vec<MapEntity>),

    /// The tile arrived but an entity row had an unexpected shape
    Malformed(String),
}

/// Tile key to decoded payload
pub type EntityMap = HashMap<String, TilePayload>;

/// One row of a tile's `gameEntities` list
#[derive(Debug, Clone, PartialEq)]
pub struct MapEntity {
    pub guid: String,
    pub timestamp: Option<i64>,
    pub data: EntityData,
}

/// Type-specific entity data
#[derive(Debug, Clone, PartialEq)]
pub enum EntityData {
    Portal(PortalEntity),
    /// Links, fields and anything else, keyed by their type discriminator
    Other(String),
}

/// Portal fields needed for a [`crate::models::PortalRecord`]
#[derive(Debug, Clone, PartialEq)]
pub struct PortalEntity {
    pub lat_e6: i64,
    pub lng_e6: i64,
    pub name: String,
    pub image_url: String,
}

impl PortalEntity {
    pub fn lat(&self) -> f64 {
        self.lat_e6 as f64 / 1e6
    }

    pub fn lon(&self) -> f64 {
        self.lng_e6 as f64 / 1e6
    }
}

impl MapEntity {
    /// Portal data, if this entity is a portal
    pub fn as_portal(&self) -> Option<&PortalEntity> {
        match &self.data {
            EntityData::Portal(portal) => Some(portal),
            EntityData::Other(_) => None,
        }
    }
}

/// Integer field that may arrive as a float
fn int_field(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|f| f.trunc() as i64))
}

/// String field where `null` and a missing slot both mean empty
fn text_field(values: &[Value], index: usize) -> Result<String, String> {
    match values.get(index) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(format!("field {index} is not a string: {other}")),
    }
}

fn decode_portal(data: &[Value]) -> Result<PortalEntity, String> {
    let lat_e6 = data
        .get(2)
        .and_then(int_field)
        .ok_or("portal latitude missing")?;
    let lng_e6 = data
        .get(3)
        .and_then(int_field)
        .ok_or("portal longitude missing")?;

    Ok(PortalEntity {
        lat_e6,
        lng_e6,
        name: text_field(data, PORTAL_NAME_INDEX)?,
        image_url: text_field(data, PORTAL_IMAGE_INDEX)?,
    })
}

/// Decode one `[guid, timestamp, [type, ...]]` row
pub fn decode_entity(row: &Value) -> Result<MapEntity, String> {
    let row = row.as_array().ok_or("entity row is not an array")?;

    let guid = row
        .first()
        .and_then(Value::as_str)
        .ok_or("entity guid missing")?
        .to_string();
    let timestamp = row.get(1).and_then(int_field);
    let data = row
        .get(2)
        .and_then(Value::as_array)
        .ok_or("entity data missing")?;
    let kind = data
        .first()
        .and_then(Value::as_str)
        .ok_or("entity type missing")?;

    let data = if kind == PORTAL_TYPE {
        EntityData::Portal(decode_portal(data)?)
    } else {
        EntityData::Other(kind.to_string())
    };

    Ok(MapEntity {
        guid,
        timestamp,
        data,
    })
}

/// Decode the payload object of a single tile
pub fn decode_tile(payload: &Value) -> TilePayload {
    let Some(object) = payload.as_object() else {
        return TilePayload::Malformed(String::from("tile payload is not an object"));
    };

    if let Some(error) = object.get("error") {
        let message = error
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return TilePayload::Error(message);
    }

    let rows = match object.get("gameEntities") {
        None | Some(Value::Null) => return TilePayload::Entities(Vec::new()),
        Some(Value::Array(rows)) => rows,
        Some(_) => return TilePayload::Malformed(String::from("gameEntities is not a list")),
    };

    match rows.iter().map(decode_entity).collect::<Result<Vec<_>, _>>() {
        Ok(entities) => TilePayload::Entities(entities),
        Err(reason) => TilePayload::Malformed(reason),
    }
}

/// Decode a whole `getEntities` response body
///
/// Empty bodies, `{}` and anything without `result.map` are payload errors;
/// tiles absent from the map are simply absent from the result.
pub fn decode_entities_response(body: &str) -> Result<EntityMap, PayloadError> {
    let body = body.trim();
    if body.is_empty() || body == "{}" {
        return Err(PayloadError::Empty);
    }

    let value: Value =
        serde_json::from_str(body).map_err(|e| PayloadError::Unparsable(e.to_string()))?;

    let map = value
        .get("result")
        .and_then(|result| result.get("map"))
        .and_then(Value::as_object)
        .ok_or(PayloadError::MissingMap)?;

    Ok(map
        .iter()
        .filter(|(_, payload)| !payload.is_null())
        .map(|(key, payload)| (key.clone(), decode_tile(payload)))
        .collect())
}

/// Decode a `getPortalDetails` response body
pub fn decode_portal_detail(body: &str) -> Result<PortalDetail, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;

    let result = value
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Decode(String::from("portal detail result missing")))?;

    let name = text_field(result, PORTAL_NAME_INDEX).map_err(FetchError::Decode)?;
    let image_url = text_field(result, PORTAL_IMAGE_INDEX).map_err(FetchError::Decode)?;

    if name.is_empty() {
        return Err(FetchError::Decode(String::from("portal detail has no name")));
    }

    Ok(PortalDetail { name, image_url })
}
