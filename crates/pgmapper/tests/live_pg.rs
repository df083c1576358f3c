//! End-to-end smoke test against a real database.
//!
//! Runs only when `DATABASE_URL` is set (a `.env` file works too); otherwise
//! the test is a no-op so the suite stays green without infrastructure.

use pgmapper::{Catalog, Client, Dao, MapperConfig, Row, Value};

fn database_name(url: &str) -> Option<&str> {
    let tail = url.rsplit('/').next()?;
    let name = tail.split('?').next()?;
    if name.is_empty() { None } else { Some(name) }
}

#[tokio::test]
async fn round_trip_against_live_database() {
    dotenvy::dotenv().ok();
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    let Some(db) = database_name(&url) else {
        eprintln!("DATABASE_URL has no database path; skipping");
        return;
    };

    let config = MapperConfig::new().connection_string(&url).database(db);
    let client = Client::connect(&config).unwrap();

    client
        .exec("DROP TABLE IF EXISTS pgmapper_smoke;", &[])
        .await
        .unwrap();
    client
        .exec(
            "CREATE TABLE pgmapper_smoke (id BIGSERIAL PRIMARY KEY, title TEXT);",
            &[],
        )
        .await
        .unwrap();

    let catalog = Catalog::new(db, false);
    let smoke = Dao::new("pgmapper_smoke");
    smoke.bind(&catalog, &client).await.unwrap();

    let created = smoke
        .create(&client, &Row::from_pairs(vec![("title", "it's alive")]))
        .await
        .unwrap()
        .expect("insert should return the generated id");
    let id = created.get("id").cloned().unwrap();

    let fetched = smoke.find_by_id(&client, id).await.unwrap().unwrap();
    assert_eq!(fetched.get("title"), Some(&Value::from("it's alive")));
    assert_eq!(smoke.count(&client).await.unwrap(), 1);

    client
        .exec("DROP TABLE pgmapper_smoke;", &[])
        .await
        .unwrap();
}
