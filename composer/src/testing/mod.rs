//! A small bookstore shared by the unit tests, the scenario tests and the
//! demo binary.
//!
//! Model:
//! - `Book { Id (key), Title, Pages, Chapters, Publisher }`
//! - `SignedBook : Book { Signature }`
//! - `Chapter { Number (key), Title }`
//! - `Publisher { Id (key), Name }`
//! - entity sets `Books`, `Publishers`; singleton `Featured`; function
//!   `Store.Bestsellers` returning books
//!
//! Data: three books with ids `"1"`, `"2"` and `"3"` (the last one signed),
//! two publishers, and `Featured` pointing at "Dune".

use std::sync::Arc;

use crate::expr::{Expr, ops};
use crate::memory::{MemoryProvider, MemorySourcer, MemoryStore, PropertyStubExpander};
use crate::model::{DataModel, EntityType, TypeRef};
use crate::query::{ComposableQuery, QueryContext, QueryProvider, QueryServices, Record, Value};

#[must_use]
pub fn book() -> TypeRef {
    TypeRef::structured("Book")
}

#[must_use]
pub fn chapter() -> TypeRef {
    TypeRef::structured("Chapter")
}

#[must_use]
pub fn publisher() -> TypeRef {
    TypeRef::structured("Publisher")
}

#[must_use]
pub fn publishers_type() -> TypeRef {
    TypeRef::queryable(publisher())
}

/// The unsourced `Books` entity set.
#[must_use]
pub fn books() -> Expr {
    ops::source(None, "Books", TypeRef::queryable(book()))
}

/// `Books` restricted to the book with the given key.
#[must_use]
pub fn key_lookup(id: &str) -> Expr {
    ops::where_(
        books(),
        ops::lambda("b", book(), |b| {
            ops::eq(
                Expr::member(Expr::clone(b), "Id", TypeRef::string()),
                Expr::string(id),
            )
        }),
    )
}

/// Build the bookstore data model.
#[must_use]
#[allow(clippy::expect_used)] // The declarations below are fixed and valid
pub fn bookstore_model() -> DataModel {
    DataModel::builder()
        .entity_type(
            EntityType::new("Book")
                .key(["Id"])
                .property("Id", TypeRef::string())
                .property("Title", TypeRef::string())
                .property("Pages", TypeRef::int64())
                .navigation("Chapters", TypeRef::collection(chapter()))
                .navigation("Publisher", publisher()),
        )
        .entity_type(
            EntityType::new("SignedBook")
                .derives("Book")
                .property("Signature", TypeRef::string()),
        )
        .entity_type(
            EntityType::new("Chapter")
                .key(["Number"])
                .property("Number", TypeRef::int64())
                .property("Title", TypeRef::string()),
        )
        .entity_type(
            EntityType::new("Publisher")
                .key(["Id"])
                .property("Id", TypeRef::string())
                .property("Name", TypeRef::string()),
        )
        .entity_set("Books", "Book")
        .entity_set("Publishers", "Publisher")
        .singleton("Featured", "Book")
        .function(
            Some("Store"),
            "Bestsellers",
            TypeRef::collection(book()),
            Some("Books"),
        )
        .build()
        .expect("bookstore model is valid")
}

fn chapters(titles: &[&str]) -> Value {
    Value::Collection(
        titles
            .iter()
            .zip(1_i64..)
            .map(|(title, number)| {
                Value::from(
                    Record::new("Chapter")
                        .with("Number", number)
                        .with("Title", *title),
                )
            })
            .collect(),
    )
}

/// Build the bookstore rows.
#[must_use]
pub fn bookstore_store() -> MemoryStore {
    let chilton = Record::new("Publisher").with("Id", "p1").with("Name", "Chilton");
    let penguin = Record::new("Publisher").with("Id", "p2").with("Name", "Penguin");

    let dune = Record::new("Book")
        .with("Id", "1")
        .with("Title", "Dune")
        .with("Pages", 412_i64)
        .with("Chapters", chapters(&["Arrakis", "Muad'Dib"]))
        .with("Publisher", chilton.clone());
    let emma = Record::new("Book")
        .with("Id", "2")
        .with("Title", "Emma")
        .with("Pages", 474_i64)
        .with("Chapters", chapters(&["Hartfield"]))
        .with("Publisher", penguin.clone());
    let neuromancer = Record::new("SignedBook")
        .with("Id", "3")
        .with("Title", "Neuromancer")
        .with("Pages", 271_i64)
        .with("Chapters", chapters(&["Chiba City", "The Shopping Expedition", "Midnight"]))
        .with("Publisher", penguin.clone())
        .with("Signature", "WG");

    MemoryStore::new()
        .with_table(
            "Books",
            [dune.clone(), emma, neuromancer.clone()].map(Value::from),
        )
        .with_table("Publishers", [chilton, penguin].map(Value::from))
        .with_table("Featured", [Value::from(dune.clone())])
        .with_table("Store.Bestsellers", [dune, neuromancer].map(Value::from))
}

/// Build the bookstore: model plus in-memory provider.
#[must_use]
pub fn bookstore() -> Bookstore {
    let model = Arc::new(bookstore_model());
    let provider = Arc::new(MemoryProvider::new(bookstore_store(), Arc::clone(&model)));
    Bookstore { model, provider }
}

/// The bookstore model bound to its in-memory data.
#[derive(Debug, Clone)]
pub struct Bookstore {
    model: Arc<DataModel>,
    provider: Arc<MemoryProvider>,
}

impl Bookstore {
    #[must_use]
    pub const fn model(&self) -> &Arc<DataModel> {
        &self.model
    }

    #[must_use]
    pub const fn provider(&self) -> &Arc<MemoryProvider> {
        &self.provider
    }

    #[must_use]
    pub fn sourcer(&self) -> MemorySourcer {
        MemorySourcer::new(Arc::clone(&self.provider))
    }

    /// The sourcer and property expander, and nothing else.
    #[must_use]
    pub fn services(&self) -> QueryServices {
        QueryServices::new()
            .with_sourcer(self.sourcer())
            .with_expander(PropertyStubExpander)
    }

    #[must_use]
    pub fn context(&self, services: QueryServices) -> QueryContext {
        QueryContext::new(Arc::clone(&self.model), Arc::new(services))
    }

    /// `Books` as a concrete query.
    #[must_use]
    pub fn books_query(&self) -> ComposableQuery {
        ComposableQuery::new(
            Arc::clone(&self.provider) as Arc<dyn QueryProvider>,
            Expr::table("Books", book()),
            book(),
        )
    }
}
