use serde::{Deserialize, Serialize};

/// A registered delivery handler kind (filesystem, ftp, database, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryType {
    pub delivery_type_id: i64,
    /// Unique across all delivery types
    pub name: String,
    pub description: Option<String>,
    /// Name the delivery layer resolves its handler by
    pub bean_name: String,
    /// Whether removing an item requires re-assembling it first
    pub unpublishing_requires_assembly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDeliveryType {
    pub name: String,
    pub description: Option<String>,
    pub bean_name: String,
    pub unpublishing_requires_assembly: bool,
}

impl NewDeliveryType {
    pub fn into_delivery_type(self, delivery_type_id: i64) -> DeliveryType {
        DeliveryType {
            delivery_type_id,
            name: self.name,
            description: self.description,
            bean_name: self.bean_name,
            unpublishing_requires_assembly: self.unpublishing_requires_assembly,
        }
    }
}
