use serde::{Deserialize, Serialize};

/// The wrapper every vendor endpoint answers with.
///
/// A `200` with `success: false` is a business failure (bad OTP, empty
/// stock, ...) and is handed to the caller as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorEnvelope<T> {
    #[serde(rename = "statusCode", default)]
    pub status_code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
}

impl<T> VendorEnvelope<T> {
    /// The payload of a successful envelope, or the vendor's message.
    pub fn into_result(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err(format!("Vendor reported success without data: {}", self.message)),
            (false, _) => Err(self.message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    #[serde(default)]
    pub order: i32,
    pub payment_method: String,
    #[serde(default)]
    pub payment_method_display_name: String,
    #[serde(rename = "desc", default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub package_code: String,
    pub package_name: String,
    #[serde(rename = "package_name_alias_short", default)]
    pub short_name: String,
    #[serde(rename = "package_description", default)]
    pub description: String,
    #[serde(rename = "package_harga_int", default)]
    pub price: i64,
    #[serde(default)]
    pub need_check_stock: bool,
    #[serde(default)]
    pub available_payment_methods: Vec<PaymentMethod>,
}

/// Criteria for narrowing the package list. Empty or zero fields match
/// everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageSearch {
    /// Case-insensitive substring of the name or description
    pub query: String,
    pub payment_method: String,
    pub min_price: i64,
    pub max_price: i64,
}

impl PackageSearch {
    pub fn matches(&self, package: &Package) -> bool {
        let query = self.query.trim().to_lowercase();
        let text_ok = query.is_empty()
            || package.package_name.to_lowercase().contains(&query)
            || package.description.to_lowercase().contains(&query);
        let method_ok = self.payment_method.is_empty() || package.accepts(&self.payment_method);
        let min_ok = self.min_price <= 0 || package.price >= self.min_price;
        let max_ok = self.max_price <= 0 || package.price <= self.max_price;
        text_ok && method_ok && min_ok && max_ok
    }
}

impl Package {
    pub fn accepts(&self, payment_method: &str) -> bool {
        self.available_payment_methods
            .iter()
            .any(|m| m.payment_method.eq_ignore_ascii_case(payment_method))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceEntry {
    pub package_code: String,
    #[serde(default)]
    pub package_name: String,
    pub price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpRequestData {
    pub auth_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtpLoginData {
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRequest {
    pub package_code: String,
    /// Subscriber number with the `62` country prefix
    pub phone: String,
    pub access_token: String,
    pub payment_method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PurchaseData {
    #[serde(default)]
    pub trx_id: String,
    #[serde(default)]
    pub package_name: String,
    #[serde(rename = "package_processing_fee", default)]
    pub processing_fee: i64,
}
