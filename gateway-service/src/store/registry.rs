//! Catalog of nodes and sensors.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, ErrorCode, OptionalExtension};
use tracing::debug;

use super::Store;
use crate::error::StoreError;

/// Largest assignable node or sensor ID; 0xFF is the on-air pad sentinel.
pub const MAX_ID: u8 = 0xFE;

/// A registered field node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    pub id: u8,
    pub name: String,
    pub location: String,
}

/// A registered sensor, owned by exactly one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorRecord {
    pub id: u8,
    pub node_id: u8,
    pub name: String,
    pub quantity: Quantity,
}

/// The SI quantity a sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Length,
    Volume,
    Mass,
    Force,
    Pressure,
    Temperature,
    Time,
    Potential,
    Current,
    Power,
    Resistance,
    Frequency,
    Energy,
    Luminosity,
    Illuminance,
    Percentage,
    Velocity,
    Acceleration,
    Flow,
}

impl Quantity {
    pub const ALL: [Quantity; 19] = [
        Quantity::Length,
        Quantity::Volume,
        Quantity::Mass,
        Quantity::Force,
        Quantity::Pressure,
        Quantity::Temperature,
        Quantity::Time,
        Quantity::Potential,
        Quantity::Current,
        Quantity::Power,
        Quantity::Resistance,
        Quantity::Frequency,
        Quantity::Energy,
        Quantity::Luminosity,
        Quantity::Illuminance,
        Quantity::Percentage,
        Quantity::Velocity,
        Quantity::Acceleration,
        Quantity::Flow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Quantity::Length => "Length",
            Quantity::Volume => "Volume",
            Quantity::Mass => "Mass",
            Quantity::Force => "Force",
            Quantity::Pressure => "Pressure",
            Quantity::Temperature => "Temperature",
            Quantity::Time => "Time",
            Quantity::Potential => "Potential",
            Quantity::Current => "Current",
            Quantity::Power => "Power",
            Quantity::Resistance => "Resistance",
            Quantity::Frequency => "Frequency",
            Quantity::Energy => "Energy",
            Quantity::Luminosity => "Luminosity",
            Quantity::Illuminance => "Illuminance",
            Quantity::Percentage => "Percentage",
            Quantity::Velocity => "Velocity",
            Quantity::Acceleration => "Acceleration",
            Quantity::Flow => "Flow",
        }
    }

    /// SI unit measured, e.g. "pascal" for Pressure.
    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::Length => "meter",
            Quantity::Volume => "cubic meter",
            Quantity::Mass => "kilogram",
            Quantity::Force => "newton",
            Quantity::Pressure => "pascal",
            Quantity::Temperature => "kelvin",
            Quantity::Time => "second",
            Quantity::Potential => "volt",
            Quantity::Current => "ampere",
            Quantity::Power => "watt",
            Quantity::Resistance => "ohm",
            Quantity::Frequency => "hertz",
            Quantity::Energy => "joule",
            Quantity::Luminosity => "candela",
            Quantity::Illuminance => "lux",
            Quantity::Percentage => "percent",
            Quantity::Velocity => "meters per second",
            Quantity::Acceleration => "meters per second squared",
            Quantity::Flow => "cubic meters per second",
        }
    }

    /// Unit symbol, e.g. "Pa".
    pub fn symbol(&self) -> &'static str {
        match self {
            Quantity::Length => "m",
            Quantity::Volume => "m3",
            Quantity::Mass => "kg",
            Quantity::Force => "N",
            Quantity::Pressure => "Pa",
            Quantity::Temperature => "K",
            Quantity::Time => "s",
            Quantity::Potential => "V",
            Quantity::Current => "A",
            Quantity::Power => "W",
            Quantity::Resistance => "ohm",
            Quantity::Frequency => "Hz",
            Quantity::Energy => "J",
            Quantity::Luminosity => "cd",
            Quantity::Illuminance => "lx",
            Quantity::Percentage => "%",
            Quantity::Velocity => "m/s",
            Quantity::Acceleration => "m/s^2",
            Quantity::Flow => "m3/s",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Quantity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Quantity, StoreError> {
        Quantity::ALL
            .iter()
            .copied()
            .find(|quantity| quantity.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                StoreError::InvalidField(format!("unknown sensor data quantity '{s}'"))
            })
    }
}

fn check_id_and_name(id: u8, name: &str, record_type: &str) -> Result<(), StoreError> {
    if id > MAX_ID {
        return Err(StoreError::InvalidField(format!(
            "{record_type} ID must be in range 0 - 254 (0x00 - 0xfe)"
        )));
    }
    if !name.chars().next().is_some_and(|c| c.is_alphabetic()) {
        return Err(StoreError::InvalidField(format!(
            "{record_type} name must be a string beginning with a letter"
        )));
    }
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

impl Store {
    /// Registers a new node.
    pub fn add_node(&self, id: u8, name: &str, location: &str) -> Result<(), StoreError> {
        check_id_and_name(id, name, "node")?;
        let inserted = self.conn().execute(
            r#"INSERT INTO "Nodes" ("ID", "Name", "Location") VALUES (?1, ?2, ?3)"#,
            params![id, name, location],
        );
        match inserted {
            Ok(_) => {
                debug!(node_id = id, name, "node registered");
                Ok(())
            }
            Err(err) if is_constraint_violation(&err) => Err(StoreError::Conflict(
                "node ID and name must be unique".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Registers a new sensor; its owning node must already exist.
    pub fn add_sensor(
        &self,
        id: u8,
        node_id: u8,
        name: &str,
        quantity: Quantity,
    ) -> Result<(), StoreError> {
        check_id_and_name(id, name, "sensor")?;
        if !self.node_exists(node_id)? {
            return Err(StoreError::Conflict(format!(
                "node with ID 0x{node_id:02x} must already exist in the database"
            )));
        }
        let inserted = self.conn().execute(
            r#"INSERT INTO "Sensors" ("ID", "Node_ID", "Name", "Quantity") VALUES (?1, ?2, ?3, ?4)"#,
            params![id, node_id, name, quantity.name()],
        );
        match inserted {
            Ok(_) => {
                debug!(sensor_id = id, node_id, name, "sensor registered");
                Ok(())
            }
            Err(err) if is_constraint_violation(&err) => Err(StoreError::Conflict(
                "sensor ID and name must be unique".to_string(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// All node IDs in ascending order.
    pub fn list_node_ids(&self) -> Result<Vec<u8>, StoreError> {
        self.list_ids(r#"SELECT "ID" FROM "Nodes" ORDER BY "ID""#)
    }

    /// All sensor IDs in ascending order.
    pub fn list_sensor_ids(&self) -> Result<Vec<u8>, StoreError> {
        self.list_ids(r#"SELECT "ID" FROM "Sensors" ORDER BY "ID""#)
    }

    fn list_ids(&self, sql: &str) -> Result<Vec<u8>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(ids)
    }

    pub fn get_node(&self, id: u8) -> Result<NodeRecord, StoreError> {
        self.conn()
            .query_row(
                r#"SELECT "ID", "Name", "Location" FROM "Nodes" WHERE "ID" = ?1"#,
                params![id],
                |row| {
                    Ok(NodeRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        location: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or(StoreError::NodeNotFound(id))
    }

    pub fn get_sensor(&self, id: u8) -> Result<SensorRecord, StoreError> {
        let row = self
            .conn()
            .query_row(
                r#"SELECT "ID", "Node_ID", "Name", "Quantity" FROM "Sensors" WHERE "ID" = ?1"#,
                params![id],
                |row| {
                    Ok((
                        row.get::<_, u8>(0)?,
                        row.get::<_, u8>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
            .ok_or(StoreError::SensorNotFound(id))?;
        Ok(SensorRecord {
            id: row.0,
            node_id: row.1,
            name: row.2,
            quantity: row.3.parse()?,
        })
    }

    /// IDs of the sensors owned by `node_id`, ascending.
    pub fn sensors_of_node(&self, node_id: u8) -> Result<Vec<u8>, StoreError> {
        if !self.node_exists(node_id)? {
            return Err(StoreError::NodeNotFound(node_id));
        }
        let conn = self.conn();
        let mut stmt =
            conn.prepare(r#"SELECT "ID" FROM "Sensors" WHERE "Node_ID" = ?1 ORDER BY "ID""#)?;
        let ids = stmt
            .query_map(params![node_id], |row| row.get(0))?
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(ids)
    }

    fn node_exists(&self, node_id: u8) -> Result<bool, StoreError> {
        let found = self
            .conn()
            .query_row(
                r#"SELECT 1 FROM "Nodes" WHERE "ID" = ?1"#,
                params![node_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn added_node_reads_back() {
        let store = store();
        store.add_node(0x20, "Pool house", "Garden").unwrap();
        let node = store.get_node(0x20).unwrap();
        assert_eq!(
            node,
            NodeRecord {
                id: 0x20,
                name: "Pool house".into(),
                location: "Garden".into(),
            }
        );
    }

    #[test]
    fn duplicate_node_id_conflicts() {
        let store = store();
        store.add_node(0x01, "Greenhouse", "Garden").unwrap();
        let err = store.add_node(0x01, "Workshop", "Yard").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    }

    #[test]
    fn duplicate_node_name_conflicts() {
        let store = store();
        store.add_node(0x01, "Greenhouse", "Garden").unwrap();
        let err = store.add_node(0x02, "Greenhouse", "Yard").unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    }

    #[test]
    fn node_id_out_of_range_is_invalid() {
        let err = store().add_node(0xFF, "Gate", "Drive").unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)), "{err}");
    }

    #[test]
    fn node_name_must_start_with_a_letter() {
        let store = store();
        for name in ["", "4th bedroom", " padded"] {
            let err = store.add_node(0x01, name, "House").unwrap_err();
            assert!(matches!(err, StoreError::InvalidField(_)), "{name:?}");
        }
    }

    #[test]
    fn missing_node_is_not_found() {
        let err = store().get_node(0x42).unwrap_err();
        assert!(matches!(err, StoreError::NodeNotFound(0x42)), "{err}");
    }

    #[test]
    fn sensor_requires_existing_node() {
        let err = store()
            .add_sensor(0x01, 0x10, "Tank level", Quantity::Length)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    }

    #[test]
    fn sensor_round_trips_with_quantity() {
        let store = store();
        store.add_node(0x10, "Tank", "Field").unwrap();
        store
            .add_sensor(0x07, 0x10, "Tank pressure", Quantity::Pressure)
            .unwrap();
        let sensor = store.get_sensor(0x07).unwrap();
        assert_eq!(sensor.node_id, 0x10);
        assert_eq!(sensor.quantity, Quantity::Pressure);
    }

    #[test]
    fn duplicate_sensor_name_conflicts() {
        let store = store();
        store.add_node(0x10, "Tank", "Field").unwrap();
        store
            .add_sensor(0x07, 0x10, "Level", Quantity::Length)
            .unwrap();
        let err = store
            .add_sensor(0x08, 0x10, "Level", Quantity::Length)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "{err}");
    }

    #[test]
    fn sensors_of_node_lists_only_that_node() {
        let store = store();
        store.add_node(0x10, "Tank", "Field").unwrap();
        store.add_node(0x11, "Gate", "Drive").unwrap();
        store
            .add_sensor(0x01, 0x10, "Level", Quantity::Length)
            .unwrap();
        store
            .add_sensor(0x02, 0x11, "Switch", Quantity::Percentage)
            .unwrap();
        store
            .add_sensor(0x03, 0x10, "Temp", Quantity::Temperature)
            .unwrap();
        assert_eq!(store.sensors_of_node(0x10).unwrap(), vec![0x01, 0x03]);
        assert!(matches!(
            store.sensors_of_node(0x42),
            Err(StoreError::NodeNotFound(0x42))
        ));
    }

    #[test]
    fn list_ids_are_ascending() {
        let store = store();
        store.add_node(0x30, "C", "x").unwrap();
        store.add_node(0x01, "A", "x").unwrap();
        store.add_node(0x10, "B", "x").unwrap();
        assert_eq!(store.list_node_ids().unwrap(), vec![0x01, 0x10, 0x30]);
        assert!(store.list_sensor_ids().unwrap().is_empty());
    }

    #[test]
    fn quantity_parses_all_names() {
        for quantity in Quantity::ALL {
            assert_eq!(quantity.name().parse::<Quantity>().unwrap(), quantity);
        }
        assert!("Sogginess".parse::<Quantity>().is_err());
    }

    #[test]
    fn quantity_units_and_symbols() {
        assert_eq!(Quantity::Pressure.unit(), "pascal");
        assert_eq!(Quantity::Pressure.symbol(), "Pa");
        assert_eq!(Quantity::Percentage.symbol(), "%");
    }
}
