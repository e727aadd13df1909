use chrono::{DateTime, Utc};
use cqlkit::{ColumnDef, ColumnType, CqlValue, DriverError, Model, Row, Values};
use uuid::Uuid;

pub const TEAM_TABLE: &str = "Team_Members";

/// One row of `"Team_Members"`
#[derive(Debug, Clone)]
pub struct TeamMember {
    pub team_name: String,
    pub team_location: String,
    pub team_manager: String,
    pub member_name: String,
    pub member_nationality: String,
    pub member_position: String,
}

impl TeamMember {
    pub fn new(team_name: &str, location: &str, manager: &str, member: &str) -> Self {
        Self {
            team_name: team_name.to_string(),
            team_location: location.to_string(),
            team_manager: manager.to_string(),
            member_name: member.to_string(),
            member_nationality: "Ukraine".to_string(),
            member_position: "Big boss".to_string(),
        }
    }

    pub fn create_table_cql() -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (team_name text, team_location text, \
             team_manager text, member_name text, member_nationality text, \
             member_position text, PRIMARY KEY ((team_name), member_name))",
            TEAM_TABLE
        )
    }

    pub fn insert_cql() -> String {
        format!(
            "INSERT INTO \"{}\" (team_name, team_location, team_manager, member_name, \
             member_nationality, member_position) VALUES (:team_name, :team_location, \
             :team_manager, :member_name, :member_nationality, :member_position)",
            TEAM_TABLE
        )
    }

    pub fn values(&self) -> Values {
        Values::named([
            ("team_name", self.team_name.as_str()),
            ("team_location", self.team_location.as_str()),
            ("team_manager", self.team_manager.as_str()),
            ("member_name", self.member_name.as_str()),
            ("member_nationality", self.member_nationality.as_str()),
            ("member_position", self.member_position.as_str()),
        ])
    }

    pub fn from_row(row: &Row) -> Result<Self, DriverError> {
        let text = |name: &str| -> Result<String, DriverError> {
            Ok(row.get_as::<Option<String>>(name)?.unwrap_or_default())
        };
        Ok(Self {
            team_name: text("team_name")?,
            team_location: text("team_location")?,
            team_manager: text("team_manager")?,
            member_name: text("member_name")?,
            member_nationality: text("member_nationality")?,
            member_position: text("member_position")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExampleModel {
    pub example_id: Option<Uuid>,
    pub example_type: i32,
    pub created_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

impl ExampleModel {
    pub fn new(example_type: i32, description: &str) -> Self {
        Self {
            example_id: None,
            example_type,
            created_at: Some(Utc::now()),
            description: Some(description.to_string()),
        }
    }
}

impl Model for ExampleModel {
    const TABLE: &'static str = "example_model";
    const KEYSPACE: Option<&'static str> = Some("elko");

    fn columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("example_id", ColumnType::Uuid)
                .primary_key()
                .default_with(|| CqlValue::Uuid(Uuid::new_v4())),
            ColumnDef::new("example_type", ColumnType::Int).index(),
            ColumnDef::new("created_at", ColumnType::Timestamp),
            ColumnDef::new("description", ColumnType::Text),
        ]
    }

    fn to_values(&self) -> Vec<(String, CqlValue)> {
        vec![
            ("example_id".to_string(), self.example_id.into()),
            ("example_type".to_string(), self.example_type.into()),
            ("created_at".to_string(), self.created_at.into()),
            ("description".to_string(), self.description.clone().into()),
        ]
    }

    fn from_row(row: &Row) -> Result<Self, DriverError> {
        Ok(Self {
            example_id: row.get_as("example_id")?,
            example_type: row.get_as("example_type")?,
            created_at: row.get_as("created_at")?,
            description: row.get_as("description")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_member_binds_every_marker() {
        let member = TeamMember::new("Bobs Team", "Kyiv", "Bob", "Bob");
        let values = member.values();
        assert_eq!(values.len(), 6);
        assert_eq!(TeamMember::insert_cql().matches(':').count(), 6);
    }
}
