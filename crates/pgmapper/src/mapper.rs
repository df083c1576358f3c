//! Top-level entry point.
//!
//! A [`Mapper`] collects table facades declared before any connection
//! exists, then [`Mapper::initialize`] connects the pool, builds the schema
//! catalog and binds every facade in one pass.

use crate::client::Client;
use crate::config::MapperConfig;
use crate::dao::{Dao, DaoOptions};
use crate::error::{MapperError, MapperResult};
use crate::schema::Catalog;
use std::sync::{Arc, Mutex, OnceLock};

pub struct Mapper {
    config: MapperConfig,
    daos: Mutex<Vec<Arc<Dao>>>,
    client: OnceLock<Arc<Client>>,
    catalog: OnceLock<Arc<Catalog>>,
}

impl Mapper {
    pub fn new(config: MapperConfig) -> Self {
        Self {
            config,
            daos: Mutex::new(Vec::new()),
            client: OnceLock::new(),
            catalog: OnceLock::new(),
        }
    }

    /// Declare a facade for a table. Must happen before [`initialize`]:
    /// binding is a one-shot pass, so later declarations would never get a
    /// schema.
    ///
    /// [`initialize`]: Mapper::initialize
    pub fn map(&self, table: &str) -> MapperResult<Arc<Dao>> {
        self.map_with_options(DaoOptions {
            table_name: table.to_string(),
            primary_key: None,
            strict: self.config.strict,
        })
    }

    pub fn map_with_options(&self, options: DaoOptions) -> MapperResult<Arc<Dao>> {
        if self.client.get().is_some() {
            return Err(MapperError::configuration(format!(
                "cannot map '{}' after initialization",
                options.table_name
            )));
        }
        let dao = Dao::with_options(options);
        self.daos
            .lock()
            .expect("dao registry lock poisoned")
            .push(Arc::clone(&dao));
        Ok(dao)
    }

    /// Connect the pool, then introspect and bind every mapped table.
    pub async fn initialize(&self) -> MapperResult<()> {
        let client = Arc::new(Client::connect(&self.config)?);
        let catalog = Arc::new(Catalog::new(
            self.config.database_name()?,
            self.config.strict,
        ));

        let daos = {
            let daos = self.daos.lock().expect("dao registry lock poisoned");
            daos.clone()
        };
        for dao in &daos {
            dao.bind(&catalog, client.as_ref()).await?;
        }

        let _ = self.client.set(client);
        let _ = self.catalog.set(catalog);
        Ok(())
    }

    /// The pooled client, available after [`Mapper::initialize`].
    pub fn client(&self) -> MapperResult<Arc<Client>> {
        self.client
            .get()
            .cloned()
            .ok_or_else(|| MapperError::configuration("mapper is not initialized"))
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_tables_start_unbound() {
        let mapper = Mapper::new(MapperConfig::new().database("app"));
        let posts = mapper.map("posts").unwrap();
        assert!(matches!(posts.schema(), Err(MapperError::Unbound(_))));
        assert!(mapper.client().is_err());
    }
}
