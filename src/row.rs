use csv::StringRecord;
use thiserror::Error;

/// Columns per dataset row
pub const FIELD_COUNT: usize = 17;

/// Dataset columns in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Language,
    PageUrl,
    ImageUrl,
    PageTitle,
    SectionTitle,
    HierarchicalSectionTitle,
    CaptionReferenceDescription,
    CaptionAttributionDescription,
    CaptionAltTextDescription,
    MimeType,
    OriginalHeight,
    OriginalWidth,
    IsMainImage,
    AttributionPassesLangId,
    PageChangedRecently,
    ContextPageDescription,
    ContextSectionDescription,
}

impl Field {
    pub const ALL: [Field; FIELD_COUNT] = [
        Field::Language,
        Field::PageUrl,
        Field::ImageUrl,
        Field::PageTitle,
        Field::SectionTitle,
        Field::HierarchicalSectionTitle,
        Field::CaptionReferenceDescription,
        Field::CaptionAttributionDescription,
        Field::CaptionAltTextDescription,
        Field::MimeType,
        Field::OriginalHeight,
        Field::OriginalWidth,
        Field::IsMainImage,
        Field::AttributionPassesLangId,
        Field::PageChangedRecently,
        Field::ContextPageDescription,
        Field::ContextSectionDescription,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn column_name(self) -> &'static str {
        match self {
            Field::Language => "language",
            Field::PageUrl => "page_url",
            Field::ImageUrl => "image_url",
            Field::PageTitle => "page_title",
            Field::SectionTitle => "section_title",
            Field::HierarchicalSectionTitle => "hierarchical_section_title",
            Field::CaptionReferenceDescription => "caption_reference_description",
            Field::CaptionAttributionDescription => "caption_attribution_description",
            Field::CaptionAltTextDescription => "caption_alt_text_description",
            Field::MimeType => "mime_type",
            Field::OriginalHeight => "original_height",
            Field::OriginalWidth => "original_width",
            Field::IsMainImage => "is_main_image",
            Field::AttributionPassesLangId => "attribution_passes_lang_id",
            Field::PageChangedRecently => "page_changed_recently",
            Field::ContextPageDescription => "context_page_description",
            Field::ContextSectionDescription => "context_section_description",
        }
    }
}

/// Header row written at the top of a fresh output file
pub fn header() -> StringRecord {
    Field::ALL.iter().map(|f| f.column_name()).collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("expected 17 fields, found {0}")]
    FieldCount(usize),
    #[error("{field} is not a pixel count: {value:?}")]
    InvalidDimension { field: &'static str, value: String },
}

/// One dataset record with exactly [`FIELD_COUNT`] fields, passed through unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    record: StringRecord,
}

impl Row {
    pub fn from_record(record: StringRecord) -> Result<Self, RowError> {
        if record.len() != FIELD_COUNT {
            return Err(RowError::FieldCount(record.len()));
        }
        Ok(Self { record })
    }

    pub fn from_fields<I, T>(fields: I) -> Result<Self, RowError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self::from_record(fields.into_iter().collect())
    }

    pub fn get(&self, field: Field) -> &str {
        self.record.get(field.index()).unwrap_or_default()
    }

    pub fn image_url(&self) -> &str {
        self.get(Field::ImageUrl)
    }

    pub fn mime_type(&self) -> &str {
        self.get(Field::MimeType)
    }

    pub fn width(&self) -> Result<u32, RowError> {
        self.dimension(Field::OriginalWidth)
    }

    pub fn height(&self) -> Result<u32, RowError> {
        self.dimension(Field::OriginalHeight)
    }

    fn dimension(&self, field: Field) -> Result<u32, RowError> {
        let value = self.get(field);
        value
            .trim()
            .parse()
            .map_err(|_| RowError::InvalidDimension {
                field: field.column_name(),
                value: value.to_string(),
            })
    }

    pub fn record(&self) -> &StringRecord {
        &self.record
    }
}
