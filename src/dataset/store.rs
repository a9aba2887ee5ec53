use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Instant;

use crate::dataset::read_json;
use crate::dataset::types::{Annotation, Category, Dataset, Image};
use crate::error::Result;

/// Sorted, duplicate-free list of image ids restricting an evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageIdSet(Vec<u64>);

impl ImageIdSet {
    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.0
    }
}

impl FromIterator<u64> for ImageIdSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut ids: Vec<u64> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        ImageIdSet(ids)
    }
}

/// In-memory annotation file with id indexes.
///
/// Annotations keep file order; per-image lookups return them in that order.
#[derive(Clone, Debug, Default)]
pub struct AnnotationStore {
    imgs: BTreeMap<u64, Image>,
    cats: BTreeMap<u64, Category>,
    anns: Vec<Annotation>,
    ann_index: HashMap<u64, usize>,
    img_to_anns: HashMap<u64, Vec<usize>>,
}

impl AnnotationStore {
    /// Read a ground-truth annotation file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        log::info!("loading annotations from {}", path.display());
        let start = Instant::now();
        let dataset: Dataset = read_json(path)?;
        log::info!("done (t={:.2}s)", start.elapsed().as_secs_f64());
        Ok(Self::from_dataset(dataset))
    }

    /// Index an already-parsed ground-truth dataset.
    pub fn from_dataset(dataset: Dataset) -> Self {
        let mut anns = dataset.annotations;
        for ann in &mut anns {
            if ann.area.is_none() {
                ann.area = Some(ann.bbox_xywh().map(|b| b[2] * b[3]).unwrap_or(0.0));
            }
        }
        Self::from_parts(dataset.images, dataset.categories, anns)
    }

    pub(crate) fn from_parts(
        images: Vec<Image>,
        categories: Vec<Category>,
        anns: Vec<Annotation>,
    ) -> Self {
        log::debug!("creating index");
        let imgs: BTreeMap<u64, Image> = images.into_iter().map(|img| (img.id, img)).collect();
        let cats: BTreeMap<u64, Category> =
            categories.into_iter().map(|cat| (cat.id, cat)).collect();

        let mut ann_index = HashMap::with_capacity(anns.len());
        let mut img_to_anns: HashMap<u64, Vec<usize>> = HashMap::new();
        for (idx, ann) in anns.iter().enumerate() {
            ann_index.insert(ann.id, idx);
            img_to_anns.entry(ann.image_id).or_default().push(idx);
        }
        log::info!(
            "index created: {} images, {} categories, {} annotations",
            imgs.len(),
            cats.len(),
            anns.len()
        );

        Self {
            imgs,
            cats,
            anns,
            ann_index,
            img_to_anns,
        }
    }

    /// All image ids, ascending.
    pub fn img_ids(&self) -> Vec<u64> {
        self.imgs.keys().copied().collect()
    }

    /// Image ids as the evaluation scope.
    pub fn image_id_set(&self) -> ImageIdSet {
        self.imgs.keys().copied().collect()
    }

    /// All category ids, ascending.
    pub fn cat_ids(&self) -> Vec<u64> {
        self.cats.keys().copied().collect()
    }

    /// Annotation ids restricted to the given images and categories.
    ///
    /// An empty filter does not restrict.
    pub fn ann_ids(&self, img_ids: &[u64], cat_ids: &[u64]) -> Vec<u64> {
        self.annotations_for(img_ids, cat_ids)
            .into_iter()
            .map(|ann| ann.id)
            .collect()
    }

    /// Annotations restricted to the given images and categories, grouped by
    /// image in `img_ids` order.
    pub fn annotations_for(&self, img_ids: &[u64], cat_ids: &[u64]) -> Vec<&Annotation> {
        let cat_filter: HashSet<u64> = cat_ids.iter().copied().collect();
        let keep = |ann: &&Annotation| cat_filter.is_empty() || cat_filter.contains(&ann.category_id);
        if img_ids.is_empty() {
            return self.anns.iter().filter(keep).collect();
        }
        img_ids
            .iter()
            .filter_map(|img_id| self.img_to_anns.get(img_id))
            .flat_map(|idxs| idxs.iter().map(|&idx| &self.anns[idx]))
            .filter(keep)
            .collect()
    }

    pub fn image(&self, id: u64) -> Option<&Image> {
        self.imgs.get(&id)
    }

    pub fn category(&self, id: u64) -> Option<&Category> {
        self.cats.get(&id)
    }

    pub fn annotation(&self, id: u64) -> Option<&Annotation> {
        self.ann_index.get(&id).map(|&idx| &self.anns[idx])
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.imgs.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.cats.values()
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.anns
    }

    pub fn contains_image(&self, id: u64) -> bool {
        self.imgs.contains_key(&id)
    }

    pub fn contains_category(&self, id: u64) -> bool {
        self.cats.contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: u64) -> Image {
        Image {
            id,
            width: 100,
            height: 100,
            file_name: None,
        }
    }

    fn ann(id: u64, image_id: u64, category_id: u64) -> Annotation {
        Annotation {
            id,
            image_id,
            category_id,
            bbox: Some(vec![0.0, 0.0, 10.0, 20.0]),
            ..Default::default()
        }
    }

    fn category(id: u64) -> Category {
        Category {
            id,
            name: format!("cat{}", id),
            supercategory: None,
            keypoints: None,
            skeleton: None,
        }
    }

    fn store() -> AnnotationStore {
        AnnotationStore::from_dataset(Dataset {
            images: vec![image(5), image(3), image(3), image(9)],
            annotations: vec![ann(1, 5, 1), ann(2, 3, 2), ann(3, 5, 2), ann(4, 9, 1)],
            categories: vec![category(2), category(1)],
            ..Default::default()
        })
    }

    #[test]
    fn image_id_set_is_sorted_and_unique() {
        let store = store();
        assert_eq!(store.image_id_set().as_slice(), &[3, 5, 9]);
        assert_eq!(store.img_ids(), vec![3, 5, 9]);

        let set: ImageIdSet = [5u64, 3, 3, 9].into_iter().collect();
        assert_eq!(set.into_vec(), vec![3, 5, 9]);
    }

    #[test]
    fn missing_area_is_filled_from_bbox() {
        let store = store();
        assert_eq!(store.annotation(1).map(|a| a.area()), Some(200.0));
    }

    #[test]
    fn ann_ids_follow_image_order_then_file_order() {
        let store = store();
        assert_eq!(store.ann_ids(&[9, 5], &[]), vec![4, 1, 3]);
        assert_eq!(store.ann_ids(&[5], &[2]), vec![3]);
        assert_eq!(store.ann_ids(&[], &[1]), vec![1, 4]);
        assert!(store.ann_ids(&[42], &[]).is_empty());
    }

    #[test]
    fn cat_ids_are_ascending() {
        let store = store();
        assert_eq!(store.cat_ids(), vec![1, 2]);
    }
}
