use anyhow::Context;
use bytes::Bytes;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    images::{
        dto::ImageDto,
        repo::IMAGE_IN_USE,
        repo_types::{Image, ImageCategory, NewImage},
    },
    pagination::{Page, Pagination},
    state::AppState,
};

/// Largest accepted upload, per file.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
    pub original_name: String,
}

/// Identifies an image format from its leading bytes.
pub fn sniff_image_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some("image/png")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Checks size, declared type and magic bytes. Returns the detected content type.
pub fn validate_upload(item: &UploadItem) -> AppResult<&'static str> {
    if item.body.is_empty() {
        return Err(AppError::validation("No file uploaded"));
    }
    if item.body.len() > MAX_UPLOAD_BYTES {
        return Err(AppError::PayloadTooLarge(
            "File size cannot exceed 10MB".into(),
        ));
    }
    let declared = item.content_type.to_ascii_lowercase();
    if ext_from_mime(&declared).is_none() {
        return Err(AppError::validation(
            "Not an image! Please upload a JPEG, PNG, WebP or GIF file",
        ));
    }
    sniff_image_type(&item.body).ok_or_else(|| {
        AppError::validation("File content is not a supported image")
    })
}

/// Writes the file to storage and records its row. The file is removed again if the
/// row cannot be written.
pub async fn store_image(
    st: &AppState,
    owner_id: Uuid,
    category: ImageCategory,
    body: Bytes,
    content_type: &str,
    original_name: &str,
    key_prefix: &str,
) -> anyhow::Result<Image> {
    let id = Uuid::new_v4();
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    let filename = format!("{}{}.{}", key_prefix, id, ext);
    let key = format!("{}/{}/{}", category, owner_id, filename);
    let size_bytes = body.len() as i64;

    st.storage
        .put_object(&key, body, content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;

    let inserted = st
        .images
        .insert(NewImage {
            id,
            owner_id,
            filename,
            original_name: original_name.to_string(),
            storage_key: key.clone(),
            content_type: content_type.to_string(),
            size_bytes,
            category,
        })
        .await;

    match inserted {
        Ok(image) => Ok(image),
        Err(e) => {
            if let Err(cleanup) = st.storage.delete_object(&key).await {
                warn!(error = %cleanup, %key, "failed to remove file after insert error");
            }
            Err(e)
        }
    }
}

#[instrument(skip(st, item), fields(size = item.body.len()))]
pub async fn upload_image(
    st: &AppState,
    owner_id: Uuid,
    category: ImageCategory,
    item: UploadItem,
) -> AppResult<ImageDto> {
    if !category.is_uploadable() {
        return Err(AppError::validation(
            "Invalid category. Must be \"model\" or \"garment\"",
        ));
    }
    let content_type = validate_upload(&item)?;

    let image = store_image(
        st,
        owner_id,
        category,
        item.body,
        content_type,
        &item.original_name,
        "",
    )
    .await?;

    info!(image_id = %image.id, %category, "image uploaded");
    to_dto(st, image).await
}

pub async fn to_dto(st: &AppState, image: Image) -> AppResult<ImageDto> {
    let url = st.storage.url_for(&image.storage_key).await?;
    Ok(ImageDto {
        id: image.id,
        filename: image.filename,
        original_name: image.original_name,
        url,
        category: image.category,
        content_type: image.content_type,
        size_bytes: image.size_bytes,
        created_at: image.created_at,
    })
}

pub async fn list_images(
    st: &AppState,
    owner_id: Uuid,
    category: Option<ImageCategory>,
    pagination: Pagination,
) -> AppResult<Page<ImageDto>> {
    let (limit, offset) = pagination.limit_offset();
    let images = st
        .images
        .list_by_owner(owner_id, category, limit, offset)
        .await?;
    let total = st.images.count_by_owner(owner_id, category).await?;

    let mut items = Vec::with_capacity(images.len());
    for image in images {
        items.push(to_dto(st, image).await?);
    }
    Ok(Page {
        items,
        pagination: pagination.info(total),
    })
}

pub async fn get_image(st: &AppState, owner_id: Uuid, id: Uuid) -> AppResult<ImageDto> {
    let image = st
        .images
        .find_owned(id, owner_id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;
    to_dto(st, image).await
}

#[instrument(skip(st))]
pub async fn delete_image(st: &AppState, owner_id: Uuid, id: Uuid) -> AppResult<()> {
    let image = st
        .images
        .find_owned(id, owner_id)
        .await?
        .ok_or_else(|| AppError::not_found("Image not found"))?;

    if st.sessions.references_image(image.id).await? {
        return Err(AppError::conflict(IMAGE_IN_USE));
    }

    st.images.delete(image.id).await?;
    if let Err(e) = st.storage.delete_object(&image.storage_key).await {
        warn!(error = %e, key = %image.storage_key, "image row deleted but file removal failed");
    }
    info!(image_id = %image.id, "image deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_state, JPEG_BYTES, PNG_BYTES};

    fn item(body: &[u8], ct: &str) -> UploadItem {
        UploadItem {
            body: Bytes::copy_from_slice(body),
            content_type: ct.into(),
            original_name: "photo".into(),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn sniffs_common_formats() {
        assert_eq!(sniff_image_type(PNG_BYTES), Some("image/png"));
        assert_eq!(sniff_image_type(JPEG_BYTES), Some("image/jpeg"));
        assert_eq!(sniff_image_type(b"GIF89a....."), Some("image/gif"));
        assert_eq!(sniff_image_type(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_image_type(b"%PDF-1.7"), None);
        assert_eq!(sniff_image_type(b""), None);
    }

    #[test]
    fn validate_rejects_non_images() {
        assert!(matches!(
            validate_upload(&item(b"hello world", "text/plain")),
            Err(AppError::Validation(_))
        ));
        // declared as an image but the bytes say otherwise
        assert!(matches!(
            validate_upload(&item(b"%PDF-1.7 ...", "image/png")),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            validate_upload(&item(b"", "image/png")),
            Err(AppError::Validation(_))
        ));
        assert_eq!(validate_upload(&item(PNG_BYTES, "image/png")).unwrap(), "image/png");
    }

    #[test]
    fn validate_rejects_oversized_files() {
        let mut big = PNG_BYTES.to_vec();
        big.resize(MAX_UPLOAD_BYTES + 1, 0);
        assert!(matches!(
            validate_upload(&item(&big, "image/png")),
            Err(AppError::PayloadTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn upload_stores_file_and_row() {
        let st = fake_state();
        let owner = Uuid::new_v4();
        let dto = upload_image(&st, owner, ImageCategory::Model, item(PNG_BYTES, "image/png"))
            .await
            .expect("upload");

        assert_eq!(dto.category, ImageCategory::Model);
        assert_eq!(dto.content_type, "image/png");
        assert!(dto.url.starts_with("/uploads/model/"));
        assert!(dto.filename.ends_with(".png"));

        let image = st.images.find_owned(dto.id, owner).await.unwrap().unwrap();
        assert!(st.storage.get_object(&image.storage_key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn upload_refuses_result_category() {
        let st = fake_state();
        let err = upload_image(
            &st,
            Uuid::new_v4(),
            ImageCategory::Result,
            item(PNG_BYTES, "image/png"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn images_are_scoped_to_their_owner() {
        let st = fake_state();
        let owner = Uuid::new_v4();
        let dto = upload_image(&st, owner, ImageCategory::Garment, item(JPEG_BYTES, "image/jpeg"))
            .await
            .unwrap();

        assert!(get_image(&st, owner, dto.id).await.is_ok());
        assert!(matches!(
            get_image(&st, Uuid::new_v4(), dto.id).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            delete_image(&st, Uuid::new_v4(), dto.id).await,
            Err(AppError::NotFound(_))
        ));

        delete_image(&st, owner, dto.id).await.expect("delete");
        assert!(st.images.find_by_id(dto.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_category() {
        let st = fake_state();
        let owner = Uuid::new_v4();
        upload_image(&st, owner, ImageCategory::Model, item(PNG_BYTES, "image/png"))
            .await
            .unwrap();
        upload_image(&st, owner, ImageCategory::Garment, item(PNG_BYTES, "image/png"))
            .await
            .unwrap();

        let all = list_images(&st, owner, None, Pagination::default()).await.unwrap();
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.pagination.total, 2);

        let models = list_images(&st, owner, Some(ImageCategory::Model), Pagination::default())
            .await
            .unwrap();
        assert_eq!(models.items.len(), 1);
        assert_eq!(models.items[0].category, ImageCategory::Model);
    }

    #[tokio::test]
    async fn delete_racing_a_new_session_is_a_conflict() {
        let images = std::sync::Arc::new(crate::testing::MemImageRepo::default());
        let st = AppState {
            images: images.clone(),
            ..fake_state()
        };
        let owner = Uuid::new_v4();
        let dto = upload_image(&st, owner, ImageCategory::Model, item(PNG_BYTES, "image/png"))
            .await
            .unwrap();
        // A session grabbed the image after the reference check ran.
        images.protect(dto.id);

        let err = delete_image(&st, owner, dto.id).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == IMAGE_IN_USE));

        let image = st.images.find_by_id(dto.id).await.unwrap().expect("row kept");
        assert!(st.storage.get_object(&image.storage_key).await.unwrap().is_some());
    }
}
