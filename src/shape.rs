// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/shape.rs - 标注形状与推理结果定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::f64::consts::TAU;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// 二维坐标 [x, y]
pub type Point = [f64; 2];

/// 标注形状类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
  Rectangle,
  Polygon,
  Quadrilateral,
  Rotation,
  Point,
  Line,
  Circle,
  Linestrip,
}

/// 坐标点数量约束
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
  Exactly(usize),
  AtLeast(usize),
}

impl Cardinality {
  pub fn accepts(self, count: usize) -> bool {
    match self {
      Cardinality::Exactly(n) => count == n,
      Cardinality::AtLeast(n) => count >= n,
    }
  }
}

impl fmt::Display for Cardinality {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Cardinality::Exactly(n) => write!(f, "恰好 {} 个", n),
      Cardinality::AtLeast(n) => write!(f, "至少 {} 个", n),
    }
  }
}

impl ShapeType {
  pub const ALL: [ShapeType; 8] = [
    ShapeType::Rectangle,
    ShapeType::Polygon,
    ShapeType::Quadrilateral,
    ShapeType::Rotation,
    ShapeType::Point,
    ShapeType::Line,
    ShapeType::Circle,
    ShapeType::Linestrip,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ShapeType::Rectangle => "rectangle",
      ShapeType::Polygon => "polygon",
      ShapeType::Quadrilateral => "quadrilateral",
      ShapeType::Rotation => "rotation",
      ShapeType::Point => "point",
      ShapeType::Line => "line",
      ShapeType::Circle => "circle",
      ShapeType::Linestrip => "linestrip",
    }
  }

  /// 每种形状允许的坐标点数量
  pub fn cardinality(&self) -> Cardinality {
    match self {
      // 四个角点
      ShapeType::Rectangle | ShapeType::Quadrilateral | ShapeType::Rotation => {
        Cardinality::Exactly(4)
      }
      ShapeType::Point => Cardinality::Exactly(1),
      ShapeType::Line => Cardinality::Exactly(2),
      // 圆心 + 圆周上一点
      ShapeType::Circle => Cardinality::Exactly(2),
      ShapeType::Polygon => Cardinality::AtLeast(3),
      ShapeType::Linestrip => Cardinality::AtLeast(2),
    }
  }
}

impl fmt::Display for ShapeType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// 形状校验失败时违反的规则
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShapeRule {
  #[error("标签不能为空")]
  EmptyLabel,
  #[error("{shape_type} 需要{expected}坐标点, 实际为 {actual} 个")]
  Cardinality {
    shape_type: ShapeType,
    expected: Cardinality,
    actual: usize,
  },
  #[error("第 {0} 个坐标点包含非有限数值")]
  NonFinitePoint(usize),
  #[error("圆的半径点与圆心重合")]
  DegenerateCircle,
  #[error("置信度 {0} 超出 [0, 1] 范围")]
  ScoreOutOfRange(f64),
  #[error("方向 {0} 超出 [0, 2π] 范围")]
  DirectionOutOfRange(f64),
  #[error("group_id 必须为正整数, 实际为 {0}")]
  NonPositiveGroupId(i64),
  #[error("字段格式错误: {0}")]
  Malformed(String),
}

/// 把显式的 null 当作缺省值处理
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
  D: Deserializer<'de>,
  T: Default + Deserialize<'de>,
{
  Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 一个标注/检测得到的几何形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
  pub label: String,
  pub shape_type: ShapeType,
  pub points: Vec<Point>,
  #[serde(default)]
  pub score: Option<f64>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub attributes: Map<String, Value>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub description: String,
  #[serde(default, deserialize_with = "null_as_default")]
  pub difficult: bool,
  #[serde(default, deserialize_with = "null_as_default")]
  pub direction: f64,
  #[serde(default, deserialize_with = "null_as_default")]
  pub flags: Map<String, Value>,
  #[serde(default)]
  pub group_id: Option<i64>,
  #[serde(default, deserialize_with = "null_as_default")]
  pub kie_linking: Vec<Value>,
}

impl Shape {
  pub fn new(label: impl Into<String>, shape_type: ShapeType, points: Vec<Point>) -> Self {
    Shape {
      label: label.into(),
      shape_type,
      points,
      score: None,
      attributes: Map::new(),
      description: String::new(),
      difficult: false,
      direction: 0.0,
      flags: Map::new(),
      group_id: None,
      kie_linking: Vec::new(),
    }
  }

  /// 由左上角与右下角构造矩形，角点按顺时针排列
  pub fn rectangle(label: impl Into<String>, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
    Shape::new(
      label,
      ShapeType::Rectangle,
      vec![
        [x_min, y_min],
        [x_max, y_min],
        [x_max, y_max],
        [x_min, y_max],
      ],
    )
  }

  pub fn with_score(mut self, score: f64) -> Self {
    self.score = Some(score);
    self
  }

  pub fn with_group_id(mut self, group_id: i64) -> Self {
    self.group_id = Some(group_id);
    self
  }

  pub fn validate(&self) -> Result<(), ShapeRule> {
    if self.label.trim().is_empty() {
      return Err(ShapeRule::EmptyLabel);
    }

    let expected = self.shape_type.cardinality();
    if !expected.accepts(self.points.len()) {
      return Err(ShapeRule::Cardinality {
        shape_type: self.shape_type,
        expected,
        actual: self.points.len(),
      });
    }

    if let Some(idx) = self
      .points
      .iter()
      .position(|[x, y]| !x.is_finite() || !y.is_finite())
    {
      return Err(ShapeRule::NonFinitePoint(idx));
    }

    if self.shape_type == ShapeType::Circle && self.points[0] == self.points[1] {
      return Err(ShapeRule::DegenerateCircle);
    }

    if let Some(score) = self.score
      && !(0.0..=1.0).contains(&score)
    {
      return Err(ShapeRule::ScoreOutOfRange(score));
    }

    if !(0.0..=TAU).contains(&self.direction) {
      return Err(ShapeRule::DirectionOutOfRange(self.direction));
    }

    if let Some(group_id) = self.group_id
      && group_id <= 0
    {
      return Err(ShapeRule::NonPositiveGroupId(group_id));
    }

    Ok(())
  }
}

/// 模型返回给客户端的推理结果
///
/// `replace` 未设置时序列化结果中不出现该键，
/// 与显式的 `false` 区分开。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
  #[serde(default)]
  pub shapes: Vec<Shape>,
  #[serde(default)]
  pub description: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub replace: Option<bool>,
}

impl PredictionResult {
  pub fn with_shapes(shapes: Vec<Shape>) -> Self {
    PredictionResult {
      shapes,
      ..Default::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    self.shapes.is_empty() && self.description.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn points(n: usize) -> Vec<Point> {
    (0..n).map(|i| [i as f64, (i * 2) as f64 + 1.0]).collect()
  }

  #[test]
  fn cardinality_rules() {
    let cases = [
      (ShapeType::Rectangle, 4, 3),
      (ShapeType::Quadrilateral, 4, 5),
      (ShapeType::Rotation, 4, 2),
      (ShapeType::Point, 1, 2),
      (ShapeType::Line, 2, 1),
      (ShapeType::Circle, 2, 3),
      (ShapeType::Polygon, 3, 2),
      (ShapeType::Linestrip, 2, 1),
    ];
    for (shape_type, good, bad) in cases {
      assert!(Shape::new("a", shape_type, points(good)).validate().is_ok(), "{shape_type}");
      let err = Shape::new("a", shape_type, points(bad)).validate().unwrap_err();
      assert!(matches!(err, ShapeRule::Cardinality { actual, .. } if actual == bad));
    }
  }

  #[test]
  fn polygon_accepts_many_points() {
    assert!(Shape::new("a", ShapeType::Polygon, points(64)).validate().is_ok());
  }

  #[test]
  fn field_ranges() {
    let base = Shape::rectangle("car", 0.0, 0.0, 10.0, 10.0);
    assert!(base.clone().with_score(1.0).validate().is_ok());
    assert_eq!(
      base.clone().with_score(1.5).validate(),
      Err(ShapeRule::ScoreOutOfRange(1.5))
    );
    assert_eq!(
      base.clone().with_group_id(0).validate(),
      Err(ShapeRule::NonPositiveGroupId(0))
    );

    let mut rotated = base.clone();
    rotated.direction = -0.1;
    assert_eq!(rotated.validate(), Err(ShapeRule::DirectionOutOfRange(-0.1)));

    let mut unlabeled = base;
    unlabeled.label = "  ".to_string();
    assert_eq!(unlabeled.validate(), Err(ShapeRule::EmptyLabel));
  }

  #[test]
  fn geometric_checks() {
    let circle = Shape::new("ball", ShapeType::Circle, vec![[5.0, 5.0], [5.0, 5.0]]);
    assert_eq!(circle.validate(), Err(ShapeRule::DegenerateCircle));

    let nan = Shape::new("p", ShapeType::Point, vec![[f64::NAN, 1.0]]);
    assert_eq!(nan.validate(), Err(ShapeRule::NonFinitePoint(0)));
  }

  #[test]
  fn shape_defaults_from_minimal_json() {
    let shape: Shape = serde_json::from_value(json!({
      "label": "cat",
      "shape_type": "linestrip",
      "points": [[1, 2], [3, 4]],
      "description": null,
      "flags": null,
    }))
    .unwrap();
    assert_eq!(shape.shape_type, ShapeType::Linestrip);
    assert_eq!(shape.points, vec![[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(shape.description, "");
    assert!(shape.flags.is_empty());
    assert!(!shape.difficult);
    assert_eq!(shape.group_id, None);
  }

  #[test]
  fn replace_absent_stays_absent() {
    let result = PredictionResult::with_shapes(vec![Shape::rectangle("dog", 1.0, 2.0, 3.0, 4.0)]);
    let value = serde_json::to_value(&result).unwrap();
    assert!(value.get("replace").is_none());

    let text = serde_json::to_string(&result).unwrap();
    let parsed: PredictionResult = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.replace, None);
    assert!(!serde_json::to_string(&parsed).unwrap().contains("replace"));
  }

  #[test]
  fn replace_false_is_kept() {
    let result = PredictionResult {
      replace: Some(false),
      ..Default::default()
    };
    let value = serde_json::to_value(&result).unwrap();
    assert_eq!(value["replace"], json!(false));

    let parsed: PredictionResult = serde_json::from_value(value).unwrap();
    assert_eq!(parsed.replace, Some(false));
  }
}
