//! Иерархические имена ресурсов

use crate::common::{Error, Result};
use std::str::FromStr;

/// Разделитель компонентов имени в текстовом представлении
pub const RESOURCE_NAME_SEPARATOR: char = '/';

/// Имя ресурса в иерархии: `database/table1/page3`
///
/// Первый компонент - имя базы данных. Имя неизменяемо, сравнение и
/// хеширование структурные.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName {
    names: Vec<String>,
}

impl ResourceName {
    /// Создает имя корневого ресурса
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            names: vec![root.into()],
        }
    }

    /// Создает имя дочернего ресурса
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut names = self.names.clone();
        names.push(name.into());
        Self { names }
    }

    /// Имя родительского ресурса, `None` для корня
    pub fn parent(&self) -> Option<ResourceName> {
        if self.names.len() <= 1 {
            return None;
        }
        Some(Self {
            names: self.names[..self.names.len() - 1].to_vec(),
        })
    }

    /// Компоненты имени от корня к листу
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Последний компонент имени
    pub fn last(&self) -> &str {
        self.names.last().map(String::as_str).unwrap_or_default()
    }

    /// Глубина ресурса в иерархии (у корня 1)
    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// Является ли `self` строгим потомком `ancestor`
    pub fn is_descendant_of(&self, ancestor: &ResourceName) -> bool {
        self.names.len() > ancestor.names.len() && self.names.starts_with(&ancestor.names)
    }
}

impl std::fmt::Display for ResourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, name) in self.names.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", RESOURCE_NAME_SEPARATOR)?;
            }
            f.write_str(name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let names: Vec<String> = s
            .split(RESOURCE_NAME_SEPARATOR)
            .map(str::to_string)
            .collect();
        if names.iter().any(String::is_empty) {
            return Err(Error::invalid_lock(format!("malformed resource name '{}'", s)));
        }
        Ok(Self { names })
    }
}
