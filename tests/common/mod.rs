#![allow(dead_code)]

//! Shared schema for the integration tests: users with logs, todos,
//! wallets, addresses and liked products.

use chrono::{DateTime, Utc};
use relmapper::prelude::*;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub id: String,
    pub password: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub user_logs: Vec<UserLog>,
    pub todos: Vec<Todo>,
    pub wallets: Vec<Wallet>,
    pub addresses: Vec<Address>,
    pub like_products: Vec<Product>,
}

impl User {
    pub fn new(id: &str, first_name: &str) -> Self {
        Self {
            id: id.to_string(),
            password: "rahasia".to_string(),
            first_name: first_name.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for User {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("User", "users")
            .column(ColumnDescriptor::new("id", DataType::Text).primary_key())
            .column(ColumnDescriptor::new("password", DataType::Text))
            .column(ColumnDescriptor::new("first_name", DataType::Text))
            .column(ColumnDescriptor::new("middle_name", DataType::Text).nullable())
            .column(ColumnDescriptor::new("last_name", DataType::Text).nullable())
            .column(ColumnDescriptor::new("created_at", DataType::Timestamp).auto_create_time())
            .column(ColumnDescriptor::new("updated_at", DataType::Timestamp).auto_update_time())
            .relationship(RelationshipDescriptor::has_many("UserLogs", "UserLog").foreign_key("user_id"))
            .relationship(RelationshipDescriptor::has_many("Todos", "Todo").foreign_key("user_id"))
            .relationship(RelationshipDescriptor::has_many("Wallets", "Wallet").foreign_key("user_id"))
            .relationship(RelationshipDescriptor::has_many("Addresses", "Address").foreign_key("user_id"))
            .relationship(
                RelationshipDescriptor::many_to_many("LikeProducts", "Product", "user_like_product")
                    .join_columns("user_id", "product_id"),
            )
            .build()
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new()
            .with("id", &self.id)
            .with("password", &self.password)
            .with("first_name", &self.first_name)
            .with("middle_name", self.middle_name.clone())
            .with("last_name", self.last_name.clone())
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at);
        if !self.user_logs.is_empty() {
            record = record.with_many("UserLogs", records_of(&self.user_logs));
        }
        if !self.todos.is_empty() {
            record = record.with_many("Todos", records_of(&self.todos));
        }
        if !self.wallets.is_empty() {
            record = record.with_many("Wallets", records_of(&self.wallets));
        }
        if !self.addresses.is_empty() {
            record = record.with_many("Addresses", records_of(&self.addresses));
        }
        if !self.like_products.is_empty() {
            record = record.with_many("LikeProducts", records_of(&self.like_products));
        }
        record
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.get_as("id")?,
            password: record.get_as("password")?,
            first_name: record.get_as("first_name")?,
            middle_name: record.get_as("middle_name")?,
            last_name: record.get_as("last_name")?,
            created_at: record.get_as("created_at")?,
            updated_at: record.get_as("updated_at")?,
            user_logs: record.many("UserLogs")?,
            todos: record.many("Todos")?,
            wallets: record.many("Wallets")?,
            addresses: record.many("Addresses")?,
            like_products: record.many("LikeProducts")?,
        })
    }
}

/// Audit entry with integer millisecond timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserLog {
    pub id: i64,
    pub user_id: String,
    pub action: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub user: Option<User>,
}

impl Entity for UserLog {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("UserLog", "user_logs")
            .column(ColumnDescriptor::new("id", DataType::Integer).primary_key().auto_increment())
            .column(ColumnDescriptor::new("user_id", DataType::Text).references("users", "id"))
            .column(ColumnDescriptor::new("action", DataType::Text))
            .column(ColumnDescriptor::new("created_at", DataType::Integer).auto_create_time())
            .column(ColumnDescriptor::new("updated_at", DataType::Integer).auto_update_time())
            .relationship(RelationshipDescriptor::belongs_to("User", "User").foreign_key("user_id"))
            .build()
    }

    fn to_record(&self) -> Record {
        let record = Record::new()
            .with("id", self.id)
            .with("user_id", &self.user_id)
            .with("action", &self.action)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at);
        match &self.user {
            Some(user) => record.with_one("User", user.to_record()),
            None => record,
        }
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.get_as("id")?,
            user_id: record.get_as("user_id")?,
            action: record.get_as("action")?,
            created_at: record.get_as("created_at")?,
            updated_at: record.get_as("updated_at")?,
            user: record.one("User")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Todo {
    pub id: i64,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub user: Option<User>,
}

impl Todo {
    pub fn new(title: &str, description: &str) -> Self {
        Self {
            title: title.to_string(),
            description: Some(description.to_string()),
            ..Default::default()
        }
    }
}

impl Entity for Todo {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("Todo", "todos")
            .column(ColumnDescriptor::new("id", DataType::Integer).primary_key().auto_increment())
            .column(ColumnDescriptor::new("user_id", DataType::Text).references("users", "id"))
            .column(ColumnDescriptor::new("title", DataType::Text))
            .column(ColumnDescriptor::new("description", DataType::Text).nullable())
            .column(ColumnDescriptor::new("created_at", DataType::Timestamp).auto_create_time())
            .column(ColumnDescriptor::new("updated_at", DataType::Timestamp).auto_update_time())
            .column(ColumnDescriptor::new("deleted_at", DataType::Timestamp).soft_delete())
            .relationship(RelationshipDescriptor::belongs_to("User", "User").foreign_key("user_id"))
            .build()
    }

    fn to_record(&self) -> Record {
        let record = Record::new()
            .with("id", self.id)
            .with("user_id", &self.user_id)
            .with("title", &self.title)
            .with("description", self.description.clone())
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
            .with("deleted_at", self.deleted_at);
        match &self.user {
            Some(user) => record.with_one("User", user.to_record()),
            None => record,
        }
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.get_as("id")?,
            user_id: record.get_as("user_id")?,
            title: record.get_as("title")?,
            description: record.get_as("description")?,
            created_at: record.get_as("created_at")?,
            updated_at: record.get_as("updated_at")?,
            deleted_at: record.get_as("deleted_at")?,
            user: record.one("User")?,
        })
    }
}

/// The owner key is exposed as `owner_id` but stored in `user_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wallet {
    pub id: String,
    pub owner_id: String,
    pub balance: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Wallet {
    pub fn new(id: &str, balance: i64) -> Self {
        Self {
            id: id.to_string(),
            balance,
            ..Default::default()
        }
    }
}

impl Entity for Wallet {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("Wallet", "wallets")
            .column(ColumnDescriptor::new("id", DataType::Text).primary_key())
            .column(
                ColumnDescriptor::new("owner_id", DataType::Text)
                    .column("user_id")
                    .references("users", "id"),
            )
            .column(ColumnDescriptor::new("balance", DataType::Integer))
            .column(ColumnDescriptor::new("created_at", DataType::Timestamp).auto_create_time())
            .column(ColumnDescriptor::new("updated_at", DataType::Timestamp).auto_update_time())
            .relationship(RelationshipDescriptor::belongs_to("User", "User").foreign_key("user_id"))
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", &self.id)
            .with("owner_id", &self.owner_id)
            .with("balance", self.balance)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.get_as("id")?,
            owner_id: record.get_as("owner_id")?,
            balance: record.get_as("balance")?,
            created_at: record.get_as("created_at")?,
            updated_at: record.get_as("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    pub id: i64,
    pub user_id: String,
    pub address: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Address {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }
}

impl Entity for Address {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("Address", "addresses")
            .column(ColumnDescriptor::new("id", DataType::Integer).primary_key().auto_increment())
            .column(ColumnDescriptor::new("user_id", DataType::Text).references("users", "id"))
            .column(ColumnDescriptor::new("address", DataType::Text))
            .column(ColumnDescriptor::new("created_at", DataType::Timestamp).auto_create_time())
            .column(ColumnDescriptor::new("updated_at", DataType::Timestamp).auto_update_time())
            .relationship(RelationshipDescriptor::belongs_to("User", "User").foreign_key("user_id"))
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("id", self.id)
            .with("user_id", &self.user_id)
            .with("address", &self.address)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at)
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.get_as("id")?,
            user_id: record.get_as("user_id")?,
            address: record.get_as("address")?,
            created_at: record.get_as("created_at")?,
            updated_at: record.get_as("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub liked_by: Vec<User>,
}

impl Product {
    pub fn new(id: &str, name: &str, price: i64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            price,
            ..Default::default()
        }
    }
}

impl Entity for Product {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("Product", "products")
            .column(ColumnDescriptor::new("id", DataType::Text).primary_key())
            .column(ColumnDescriptor::new("name", DataType::Text))
            .column(ColumnDescriptor::new("price", DataType::Integer))
            .column(ColumnDescriptor::new("created_at", DataType::Timestamp).auto_create_time())
            .column(ColumnDescriptor::new("updated_at", DataType::Timestamp).auto_update_time())
            .relationship(
                RelationshipDescriptor::many_to_many("LikedBy", "User", "user_like_product")
                    .join_columns("product_id", "user_id"),
            )
            .build()
    }

    fn to_record(&self) -> Record {
        let record = Record::new()
            .with("id", &self.id)
            .with("name", &self.name)
            .with("price", self.price)
            .with("created_at", self.created_at)
            .with("updated_at", self.updated_at);
        if self.liked_by.is_empty() {
            record
        } else {
            record.with_many("LikedBy", records_of(&self.liked_by))
        }
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            id: record.get_as("id")?,
            name: record.get_as("name")?,
            price: record.get_as("price")?,
            created_at: record.get_as("created_at")?,
            updated_at: record.get_as("updated_at")?,
            liked_by: record.many("LikedBy")?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserLikeProduct {
    pub user_id: String,
    pub product_id: String,
}

impl Entity for UserLikeProduct {
    fn describe() -> EntityDescriptor {
        EntityDescriptor::builder("UserLikeProduct", "user_like_product")
            .column(
                ColumnDescriptor::new("user_id", DataType::Text)
                    .primary_key()
                    .references("users", "id"),
            )
            .column(
                ColumnDescriptor::new("product_id", DataType::Text)
                    .primary_key()
                    .references("products", "id"),
            )
            .build()
    }

    fn to_record(&self) -> Record {
        Record::new()
            .with("user_id", &self.user_id)
            .with("product_id", &self.product_id)
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(Self {
            user_id: record.get_as("user_id")?,
            product_id: record.get_as("product_id")?,
        })
    }
}

pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry.register::<User>().unwrap();
    registry.register::<UserLog>().unwrap();
    registry.register::<Todo>().unwrap();
    registry.register::<Wallet>().unwrap();
    registry.register::<Address>().unwrap();
    registry.register::<Product>().unwrap();
    registry.register::<UserLikeProduct>().unwrap();
    registry
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new("belajar_golang_gorm")
        .credentials("postgres", "postgres")
        .max_connections(10)
}

/// A database with every table created, on its own engine.
pub async fn setup() -> Database {
    let db = Database::connect(config(), registry()).unwrap();
    db.create_tables().await.unwrap();
    db
}

/// User "1" (Arthur) plus users "2".."9" ("User N"), as one batch.
pub async fn seed_users(db: &Database) {
    let mut arthur = User {
        middle_name: Some("Middle".into()),
        last_name: Some("Hozanna".into()),
        password: "akubang".into(),
        ..User::new("1", "Arthur")
    };
    db.create(&mut arthur).await.unwrap();

    let mut users: Vec<User> = (2..10).map(|i| User::new(&i.to_string(), &format!("User {}", i))).collect();
    db.create_many(&mut users).await.unwrap();
}

pub async fn user_count(db: &Database) -> u64 {
    db.query::<User>().count().await.unwrap()
}
