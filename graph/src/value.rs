use std::sync::Arc;

use raster::series::IndexSeries;
use raster::{BandStack, Mask, Statistic};
use strum_macros::{Display, EnumDiscriminants};

use crate::export::ExportReceipt;

/// Output of one evaluated node. Large values are shared, never copied.
#[derive(Debug, Clone, EnumDiscriminants)]
#[strum_discriminants(name(ValueType), derive(Display))]
pub enum Value {
    Collection(Arc<Vec<BandStack>>),
    Stack(Arc<BandStack>),
    Mask(Arc<Mask>),
    Statistic(Statistic),
    Series(Arc<IndexSeries>),
    Export(ExportReceipt),
    /// An upstream filter left nothing to compute on.
    NoData { reason: String },
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        ValueType::from(self)
    }

    pub fn no_data(reason: impl Into<String>) -> Self {
        Value::NoData {
            reason: reason.into(),
        }
    }

    pub fn as_statistic(&self) -> Option<&Statistic> {
        match self {
            Value::Statistic(stat) => Some(stat),
            _ => None,
        }
    }

    pub fn as_mask(&self) -> Option<&Arc<Mask>> {
        match self {
            Value::Mask(mask) => Some(mask),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&Arc<BandStack>> {
        match self {
            Value::Stack(stack) => Some(stack),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&Arc<IndexSeries>> {
        match self {
            Value::Series(series) => Some(series),
            _ => None,
        }
    }

    pub fn as_export(&self) -> Option<&ExportReceipt> {
        match self {
            Value::Export(receipt) => Some(receipt),
            _ => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Value::NoData { .. })
    }
}

impl From<Statistic> for Value {
    fn from(stat: Statistic) -> Self {
        Value::Statistic(stat)
    }
}

impl From<Mask> for Value {
    fn from(mask: Mask) -> Self {
        Value::Mask(Arc::new(mask))
    }
}

impl From<BandStack> for Value {
    fn from(stack: BandStack) -> Self {
        Value::Stack(Arc::new(stack))
    }
}
