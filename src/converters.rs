//! Python <-> Rust value conversion through JSON
use crate::config::DiffConfig;
use crate::errors::TableError;
use crate::types::{Patch, Table};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyModule};

/// Convert any JSON-serializable Python object to a serde_json value
pub fn python_to_json<'py>(py: Python<'py>, obj: &Bound<'py, PyAny>) -> PyResult<serde_json::Value> {
    let dumps = PyModule::import(py, "json")?.getattr("dumps")?;
    let dumped: String = dumps.call1((obj,))?.extract()?;
    serde_json::from_str(&dumped).map_err(|e| TableError::from(e).into())
}

/// Convert JSON back to Python with proper type mapping
pub fn json_to_pyobject<'py>(py: Python<'py>, value: &serde_json::Value) -> PyResult<Bound<'py, PyAny>> {
    match value {
        serde_json::Value::Null => Ok(py.None().into_bound(py).into_any()),
        serde_json::Value::Bool(b) => Ok((*b).into_pyobject(py)?.to_owned().into_any()),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.into_pyobject(py)?.into_any())
            } else if let Some(f) = n.as_f64() {
                Ok(f.into_pyobject(py)?.into_any())
            } else {
                Ok(n.to_string().into_pyobject(py)?.into_any())
            }
        }
        serde_json::Value::String(s) => Ok(s.as_str().into_pyobject(py)?.into_any()),
        serde_json::Value::Array(arr) => {
            let list = PyList::empty(py);
            for v in arr {
                list.append(json_to_pyobject(py, v)?)?;
            }
            Ok(list.into_any())
        }
        serde_json::Value::Object(map) => {
            let dict = PyDict::new(py);
            for (k, v) in map {
                dict.set_item(k, json_to_pyobject(py, v)?)?;
            }
            Ok(dict.into_any())
        }
    }
}

/// `[[{"id": ..., "height": ...}, ...], ...]` -> Table
pub fn table_from_py<'py>(py: Python<'py>, obj: &Bound<'py, PyAny>) -> PyResult<Table> {
    let value = python_to_json(py, obj)?;
    serde_json::from_value(value).map_err(|e| TableError::from(e).into())
}

pub fn table_to_py<'py>(py: Python<'py>, table: &Table) -> PyResult<Bound<'py, PyAny>> {
    let value = serde_json::to_value(table).map_err(TableError::from)?;
    json_to_pyobject(py, &value)
}

pub fn patch_to_py<'py>(py: Python<'py>, patch: &Patch) -> PyResult<Bound<'py, PyAny>> {
    let value = serde_json::to_value(patch).map_err(TableError::from)?;
    json_to_pyobject(py, &value)
}

pub fn config_from_py<'py>(py: Python<'py>, obj: &Bound<'py, PyAny>) -> PyResult<DiffConfig> {
    let value = python_to_json(py, obj)?;
    let config: DiffConfig = serde_json::from_value(value).map_err(TableError::from)?;
    config.validate()?;
    Ok(config)
}
