//! The `future` library: `{% load url from future %}` switches `url` to
//! taking its view name as an expression.

use crate::library::Library;
use crate::tags::markup::do_url;

pub fn library() -> Library {
    let mut lib = Library::new();
    lib.tag("url", |parser, token| do_url(parser, token, false));
    lib
}
