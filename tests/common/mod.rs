//! Common test helpers and utilities shared across test suite.

#![allow(dead_code)]

use frbrizer::cluster::items::ItemConversionTable;
use frbrizer::{
    derive_fingerprint, ClusterMatchEngine, Field, InMemoryMatchIndex, Leader, MatchIndex, Record,
    Stub,
};

/// Fixed-length data for a Polish-language print book published 2001.
pub const BOOK_008: &str = "010101s2001    pl            000 0 pol d";

/// Same as [`BOOK_008`] but English.
pub const BOOK_008_ENG: &str = "010101s2001    pl            000 0 eng d";

/// Builder for book records with only the fields clustering reads.
#[derive(Debug, Clone)]
pub struct Book {
    id: String,
    fixed: String,
    title: String,
    non_filing: char,
    main_author: Option<String>,
    translators: Vec<String>,
    isbns: Vec<String>,
    edition: Option<String>,
    place: Option<String>,
    extent: Option<String>,
    dimensions: Option<String>,
    series: Vec<String>,
    variants: Vec<String>,
    holdings: Vec<(String, Vec<(char, String)>)>,
}

impl Book {
    /// A book with a 245 $a title, an 852 holding and nothing else.
    pub fn new(id: &str, title: &str) -> Self {
        Book {
            id: id.to_string(),
            fixed: BOOK_008.to_string(),
            title: title.to_string(),
            non_filing: '0',
            main_author: None,
            translators: Vec::new(),
            isbns: Vec::new(),
            edition: None,
            place: None,
            extent: None,
            dimensions: None,
            series: Vec::new(),
            variants: Vec::new(),
            holdings: vec![("852".to_string(), vec![('a', "BN".to_string())])],
        }
    }

    pub fn author(mut self, name: &str) -> Self {
        self.main_author = Some(name.to_string());
        self
    }

    pub fn translator(mut self, name: &str) -> Self {
        self.translators.push(name.to_string());
        self
    }

    pub fn fixed(mut self, value: &str) -> Self {
        self.fixed = value.to_string();
        self
    }

    pub fn non_filing(mut self, offset: char) -> Self {
        self.non_filing = offset;
        self
    }

    pub fn isbn(mut self, isbn: &str) -> Self {
        self.isbns.push(isbn.to_string());
        self
    }

    pub fn edition(mut self, edition: &str) -> Self {
        self.edition = Some(edition.to_string());
        self
    }

    pub fn place(mut self, place: &str) -> Self {
        self.place = Some(place.to_string());
        self
    }

    pub fn extent(mut self, extent: &str, dimensions: &str) -> Self {
        self.extent = Some(extent.to_string());
        self.dimensions = Some(dimensions.to_string());
        self
    }

    /// Add a 246 variant title.
    pub fn variant(mut self, title: &str) -> Self {
        self.variants.push(title.to_string());
        self
    }

    pub fn series(mut self, title: &str) -> Self {
        self.series.push(title.to_string());
        self
    }

    /// Replace the default holding with a digital one (856 $u).
    pub fn digital(mut self, url: &str) -> Self {
        self.holdings = vec![("856".to_string(), vec![('u', url.to_string())])];
        self
    }

    /// Add another 852 holding.
    pub fn extra_copy(mut self) -> Self {
        self.holdings
            .push(("852".to_string(), vec![('a', "BN".to_string())]));
        self
    }

    pub fn build(self) -> Record {
        let mut builder = Record::builder(Leader::with_type('a', 'm'))
            .control_field_str("001", &self.id)
            .control_field_str("008", &self.fixed)
            .control_field_str("009", &format!("99{}", self.id));
        for isbn in &self.isbns {
            builder = builder.field(
                Field::builder("020".to_string(), ' ', ' ')
                    .subfield_str('a', isbn)
                    .build(),
            );
        }
        if let Some(author) = &self.main_author {
            builder = builder.field(
                Field::builder("100".to_string(), '1', ' ')
                    .subfield_str('a', author)
                    .build(),
            );
        }
        builder = builder.field(
            Field::builder("245".to_string(), '1', self.non_filing)
                .subfield_str('a', &self.title)
                .build(),
        );
        for variant in &self.variants {
            builder = builder.field(
                Field::builder("246".to_string(), '1', ' ')
                    .subfield_str('a', variant)
                    .build(),
            );
        }
        if let Some(edition) = &self.edition {
            builder = builder.field(
                Field::builder("250".to_string(), ' ', ' ')
                    .subfield_str('a', edition)
                    .build(),
            );
        }
        if let Some(place) = &self.place {
            builder = builder.field(
                Field::builder("260".to_string(), ' ', ' ')
                    .subfield_str('a', place)
                    .subfield_str('c', "2001.")
                    .build(),
            );
        }
        if let (Some(extent), Some(dimensions)) = (&self.extent, &self.dimensions) {
            builder = builder.field(
                Field::builder("300".to_string(), ' ', ' ')
                    .subfield_str('a', extent)
                    .subfield_str('c', dimensions)
                    .build(),
            );
        }
        builder = builder.field(
            Field::builder("380".to_string(), ' ', ' ')
                .subfield_str('a', "Książki")
                .build(),
        );
        for series in &self.series {
            builder = builder.field(
                Field::builder("490".to_string(), '0', ' ')
                    .subfield_str('a', series)
                    .build(),
            );
        }
        for translator in &self.translators {
            builder = builder.field(
                Field::builder("700".to_string(), '1', ' ')
                    .subfield_str('a', translator)
                    .subfield_str('e', "Tł.")
                    .build(),
            );
        }
        for (tag, subfields) in &self.holdings {
            let mut field = Field::builder(tag.clone(), ' ', ' ');
            for (code, value) in subfields {
                field = field.subfield_str(*code, value);
            }
            builder = builder.field(field.build());
        }
        builder.build()
    }
}

/// Engine over a fresh in-memory index with the default item table.
pub fn memory_engine() -> ClusterMatchEngine<InMemoryMatchIndex> {
    ClusterMatchEngine::new(InMemoryMatchIndex::new(), ItemConversionTable::default())
}

/// Fingerprint and match one record, returning the surviving cluster.
pub fn ingest<I: MatchIndex>(engine: &mut ClusterMatchEngine<I>, record: &Record) -> uuid::Uuid {
    let data = derive_fingerprint(record).expect("record fingerprints");
    engine
        .match_and_index(Stub::new(data), record)
        .expect("record matches")
        .survivor()
        .expect("a cluster holds the record")
}
