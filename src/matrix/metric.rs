use crate::errors::PollerError;

/// Numeric storage type of a metric column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricType {
    U8,
    U32,
    U64,
    F32,
    F64,
}

#[derive(Clone, Debug)]
enum Column {
    U8(Vec<u8>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Column {
    fn new(mtype: MetricType) -> Self {
        match mtype {
            MetricType::U8 => Self::U8(Vec::new()),
            MetricType::U32 => Self::U32(Vec::new()),
            MetricType::U64 => Self::U64(Vec::new()),
            MetricType::F32 => Self::F32(Vec::new()),
            MetricType::F64 => Self::F64(Vec::new()),
        }
    }

    fn resize(&mut self, len: usize) {
        match self {
            Self::U8(c) => {
                c.clear();
                c.resize(len, 0);
            }
            Self::U32(c) => {
                c.clear();
                c.resize(len, 0);
            }
            Self::U64(c) => {
                c.clear();
                c.resize(len, 0);
            }
            Self::F32(c) => {
                c.clear();
                c.resize(len, 0.0);
            }
            Self::F64(c) => {
                c.clear();
                c.resize(len, 0.0);
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::U8(c) => c.len(),
            Self::U32(c) => c.len(),
            Self::U64(c) => c.len(),
            Self::F32(c) => c.len(),
            Self::F64(c) => c.len(),
        }
    }

    fn store(&mut self, index: usize, value: f64) -> bool {
        let slot = match self {
            Self::U8(c) => c.get_mut(index).map(|s| *s = value as u8),
            Self::U32(c) => c.get_mut(index).map(|s| *s = value as u32),
            Self::U64(c) => c.get_mut(index).map(|s| *s = value as u64),
            Self::F32(c) => c.get_mut(index).map(|s| *s = value as f32),
            Self::F64(c) => c.get_mut(index).map(|s| *s = value),
        };
        slot.is_some()
    }

    fn load(&self, index: usize) -> Option<f64> {
        match self {
            Self::U8(c) => c.get(index).map(|v| f64::from(*v)),
            Self::U32(c) => c.get(index).map(|v| f64::from(*v)),
            Self::U64(c) => c.get(index).map(|v| *v as f64),
            Self::F32(c) => c.get(index).map(|v| f64::from(*v)),
            Self::F64(c) => c.get(index).copied(),
        }
    }
}

/// A metric descriptor plus its dense storage column.
///
/// Cells are addressed by instance index. A cell holds a value only if it
/// was explicitly set since the last `init_data`/`reset` on the owning
/// Matrix; the validity bitset is what separates "unset" from zero.
#[derive(Clone, Debug)]
pub struct Metric {
    key: String,
    display: String,
    exportable: bool,
    mtype: MetricType,
    column: Column,
    valid: Vec<bool>,
}

impl Metric {
    pub(crate) fn new(key: &str, display: &str, exportable: bool, mtype: MetricType) -> Self {
        Self {
            key: key.to_string(),
            display: display.to_string(),
            exportable,
            mtype,
            column: Column::new(mtype),
            valid: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn display_name(&self) -> &str {
        &self.display
    }

    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    pub fn set_exportable(&mut self, exportable: bool) {
        self.exportable = exportable;
    }

    pub fn metric_type(&self) -> MetricType {
        self.mtype
    }

    /// Number of cells currently allocated.
    pub fn len(&self) -> usize {
        self.column.len()
    }

    pub fn is_empty(&self) -> bool {
        self.column.len() == 0
    }

    pub(crate) fn resize(&mut self, len: usize) {
        self.column.resize(len);
        self.valid.clear();
        self.valid.resize(len, false);
    }

    pub(crate) fn reset(&mut self) {
        for v in &mut self.valid {
            *v = false;
        }
    }

    pub(crate) fn store(&mut self, index: usize, value: f64) -> Result<(), PollerError> {
        if !self.column.store(index, value) {
            return Err(PollerError::InvalidParam(format!(
                "metric ({}): instance index {index} out of range",
                self.key
            )));
        }
        if let Some(flag) = self.valid.get_mut(index) {
            *flag = true;
        }
        Ok(())
    }

    /// Value of the cell at `index`, or `None` when the cell was never set
    /// since the last `init_data`/`reset`.
    pub fn value(&self, index: usize) -> Option<f64> {
        if self.is_set(index) {
            self.column.load(index)
        } else {
            None
        }
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.valid.get(index).copied().unwrap_or(false)
    }
}
